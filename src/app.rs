//! The terminal shell: collects input, forwards it through the kit, and
//! renders streamed output in place.

use std::io::{Write, stdin, stdout};
use std::path::Path;
use std::sync::mpsc::channel;

use crossterm::{QueueableCommand, cursor, terminal};
use futures::StreamExt;

use loctag_kit::clients::gemini::DEFAULT_API_URL;
use loctag_kit::clients::gemini_live::DEFAULT_LIVE_URL;
use loctag_kit::live::{LiveSession, LiveSessionEvent};
use loctag_kit::{GeminiClient, GeminiLiveClient, protocol::*};

pub struct Config {
    pub api_key: String,
    pub model: String,
    pub location: Option<LatLng>,
}

pub fn run(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    // Make the runtime ambient so the kit's spawned tasks land on it.
    let _guard = runtime.enter();

    let mut chat_client = GeminiClient::new(DEFAULT_API_URL.to_string());
    chat_client
        .set_key(&config.api_key)
        .map_err(anyhow::Error::msg)?;

    if let Some(location) = config.location {
        chat_client.set_location(location);
    }

    let mut live_client = GeminiLiveClient::new(DEFAULT_LIVE_URL.to_string());
    live_client
        .set_key(&config.api_key)
        .map_err(anyhow::Error::msg)?;

    let bot = Bot {
        id: BotId::new(&config.model, DEFAULT_API_URL),
        name: config.model.clone(),
        avatar: Picture::Grapheme("S".to_string()),
    };

    println!("Shakil AI ready. Type a message, or use /image <path>, /live, /exit.");

    let mut messages: Vec<Message> = Vec::new();
    let mut staged_image: Option<Attachment> = None;

    loop {
        print!("> ");
        stdout().flush()?;

        let Some(line) = stdin().lines().next() else {
            break;
        };
        let line = line?;
        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        if input == "/exit" {
            break;
        }

        if let Some(path) = input.strip_prefix("/image ") {
            staged_image = load_image(path.trim());
            continue;
        }

        if input == "/live" {
            run_live(&runtime, &live_client)?;
            continue;
        }

        let mut message = Message::default();
        message.from = EntityId::User;
        message.content.text = input.to_string();
        if let Some(image) = staged_image.take() {
            message.content.attachments.push(image);
        }
        messages.push(message);

        stdout().queue(cursor::SavePosition)?.flush()?;

        let mut stream = chat_client.send(&bot, &messages);
        let content = runtime.block_on(async {
            let mut last = MessageContent::default();

            while let Some(result) = stream.next().await {
                let (value, errors) = result.into_value_and_errors();

                for error in errors {
                    log::warn!("{error}");
                }

                if let Some(snapshot) = value {
                    stdout()
                        .queue(cursor::RestorePosition)?
                        .queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
                    print!("{}", snapshot.text);
                    stdout().flush()?;
                    last = snapshot;
                }
            }

            anyhow::Ok(last)
        })?;
        println!();

        if !content.citations.is_empty() {
            println!("Sources:");
            for source in &content.citations {
                println!("  {}: {}", source.title, source.uri);
            }
        }

        let mut reply = Message::default();
        reply.from = EntityId::Bot(bot.id.clone());
        reply.content = content;
        messages.push(reply);
    }

    Ok(())
}

/// Toggle one live voice session: runs until the user presses Enter or the
/// server closes it.
fn run_live(runtime: &tokio::runtime::Runtime, client: &GeminiLiveClient) -> anyhow::Result<()> {
    let (tx, rx) = channel();

    let session = match runtime.block_on(LiveSession::start(client, move |event| {
        let _ = tx.send(event);
    })) {
        Ok(session) => session,
        Err(errors) => {
            // Microphone or connection trouble is shown to the user directly;
            // the shell stays usable.
            for error in &errors {
                eprintln!("Could not start the live session: {error}");
            }
            return Ok(());
        }
    };

    println!("Live session started. Press Enter to end it.");

    std::thread::spawn(move || {
        for event in rx {
            match event {
                LiveSessionEvent::UserTranscription(text) => println!("you: {text}"),
                LiveSessionEvent::ModelTranscription(text) => println!(" ai: {text}"),
                LiveSessionEvent::Closed => {
                    println!("(live session closed, press Enter to continue)");
                    break;
                }
            }
        }
        // The thread ends on its own once the session drops the callback.
    });

    let _ = stdin().lines().next();
    session.stop();

    Ok(())
}

fn load_image(path: &str) -> Option<Attachment> {
    let content_type = match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => {
            eprintln!("Only .jpg/.jpeg/.png images can be attached.");
            return None;
        }
    };

    match std::fs::read(path) {
        Ok(bytes) => {
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string());

            println!("Attached {name}; it will be sent with your next message.");
            Some(Attachment::from_bytes(
                name,
                Some(content_type.to_string()),
                bytes,
            ))
        }
        Err(error) => {
            eprintln!("Could not read {path}: {error}");
            None
        }
    }
}
