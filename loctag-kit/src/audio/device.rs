//! cpal glue between a live session and the host's audio devices.
//!
//! Streams are opened at the protocol rates when the device accepts them;
//! otherwise the device's preferred configuration is used and samples are
//! resampled on the way through.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, capture::CaptureQueue, codec, playback::Player};
use crate::protocol::{ClientError, ClientErrorKind};

fn device_error(message: &str) -> ClientError {
    ClientError::new(ClientErrorKind::Unknown, message.to_string())
}

/// Open the default microphone and feed mono 16 kHz chunks into the queue.
///
/// The returned stream must be kept alive for capture to continue.
pub(crate) fn open_input(queue: CaptureQueue) -> Result<cpal::Stream, ClientError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| device_error("No microphone available."))?;

    let desired = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(INPUT_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let queue_direct = queue.clone();
    let direct = device.build_input_stream(
        &desired,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            queue_direct.push(data.to_vec());
        },
        |e| log::warn!("Input stream error: {e}"),
        None,
    );

    let stream = match direct {
        Ok(stream) => stream,
        Err(error) => {
            log::debug!("Microphone rejected 16 kHz mono ({error}), falling back to its default configuration");
            open_input_fallback(&device, queue)?
        }
    };

    stream
        .play()
        .map_err(|e| ClientError::new_with_source(ClientErrorKind::Unknown, "Could not start the microphone stream.".to_string(), Some(e)))?;

    Ok(stream)
}

fn open_input_fallback(
    device: &cpal::Device,
    queue: CaptureQueue,
) -> Result<cpal::Stream, ClientError> {
    let config = device.default_input_config().map_err(|e| {
        ClientError::new_with_source(
            ClientErrorKind::Unknown,
            "Could not read the microphone configuration.".to_string(),
            Some(e),
        )
    })?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels);
                queue.push(codec::resample_linear(&mono, sample_rate, INPUT_SAMPLE_RATE));
            },
            |e| log::warn!("Input stream error: {e}"),
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let mono = downmix(&floats, channels);
                queue.push(codec::resample_linear(&mono, sample_rate, INPUT_SAMPLE_RATE));
            },
            |e| log::warn!("Input stream error: {e}"),
            None,
        ),
        other => {
            return Err(device_error(&format!(
                "Unsupported microphone sample format: {other:?}"
            )));
        }
    };

    stream.map_err(|e| {
        ClientError::new_with_source(
            ClientErrorKind::Unknown,
            "Could not open the microphone.".to_string(),
            Some(e),
        )
    })
}

/// Open the default speaker and return it together with the [`Player`] that
/// feeds it.
///
/// The player's sample rate is whatever the device actually opened at, so
/// callers resample decoded frames to [`Player::sample_rate`] before
/// enqueueing.
pub(crate) fn open_output() -> Result<(cpal::Stream, Player), ClientError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| device_error("No speaker available."))?;

    let desired = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(OUTPUT_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let player = Player::new(OUTPUT_SAMPLE_RATE);
    let render = player.clone();
    let direct = device.build_output_stream(
        &desired,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            render.render(data);
        },
        |e| log::warn!("Output stream error: {e}"),
        None,
    );

    let (stream, player) = match direct {
        Ok(stream) => (stream, player),
        Err(error) => {
            log::debug!("Speaker rejected 24 kHz mono ({error}), falling back to its default configuration");
            open_output_fallback(&device)?
        }
    };

    stream
        .play()
        .map_err(|e| ClientError::new_with_source(ClientErrorKind::Unknown, "Could not start the speaker stream.".to_string(), Some(e)))?;

    Ok((stream, player))
}

fn open_output_fallback(device: &cpal::Device) -> Result<(cpal::Stream, Player), ClientError> {
    let config = device.default_output_config().map_err(|e| {
        ClientError::new_with_source(
            ClientErrorKind::Unknown,
            "Could not read the speaker configuration.".to_string(),
            Some(e),
        )
    })?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let player = Player::new(sample_rate);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let render = player.clone();
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config.clone().into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    render.render(&mut mono);
                    fan_out(&mono, data, channels);
                },
                |e| log::warn!("Output stream error: {e}"),
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let render = player.clone();
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config.clone().into(),
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    render.render(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        let sample = (sample * 32768.0) as i32 as i16;
                        frame.fill(sample);
                    }
                },
                |e| log::warn!("Output stream error: {e}"),
                None,
            )
        }
        other => {
            return Err(device_error(&format!(
                "Unsupported speaker sample format: {other:?}"
            )));
        }
    };

    let stream = stream.map_err(|e| {
        ClientError::new_with_source(
            ClientErrorKind::Unknown,
            "Could not open the speaker.".to_string(),
            Some(e),
        )
    })?;

    Ok((stream, player))
}

/// Average interleaved frames down to one channel.
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }

    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Duplicate one mono plane across every interleaved output channel.
fn fan_out(mono: &[f32], data: &mut [f32], channels: usize) {
    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
        frame.fill(sample);
    }
}
