//! Utilities to deal with SSE (Server-Sent Events).

use futures::Stream;

pub(crate) const EVENT_TERMINATOR: &'static [u8] = b"\n\n";

/// Split from the last SSE event terminator.
///
/// On the left side you will get the side of the buffer that contains completed messages.
/// Although, the last terminator has been removed, this side may still contain multiple
/// messages that need to be split.
///
/// On the right side you will get the side of the buffer that contains the incomplete data,
/// so you should keep this on the buffer until completed.
///
/// Returns `None` if no terminator is found.
pub(crate) fn rsplit_once_terminator(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    buffer
        .windows(2)
        .enumerate()
        .rev()
        .find(|(_, w)| w == &EVENT_TERMINATOR)
        .map(|(pos, _)| {
            let (before, after_with_terminator) = buffer.split_at(pos);
            let after = &after_with_terminator[2..];
            (before, after)
        })
}

/// Split a buffer of completed messages into the individual events.
fn split_events(completed: &[u8]) -> Vec<&[u8]> {
    let mut events = Vec::new();
    let mut rest = completed;

    while let Some(pos) = rest.windows(2).position(|w| w == EVENT_TERMINATOR) {
        events.push(&rest[..pos]);
        rest = &rest[pos + 2..];
    }

    events.push(rest);
    events
}

/// Extract the payload of an event, joining its `data:` lines.
///
/// Returns `None` for events that carry no data and for the `[DONE]`
/// sentinel some providers send to terminate the stream.
fn event_data(event: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event);

    let data = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|line| line.strip_prefix(' ').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

/// Parse a raw byte stream as a stream of SSE data payloads.
///
/// Chunk boundaries are independent of event boundaries, so incomplete events
/// are buffered until their terminator arrives. An error from the underlying
/// stream ends the parsed stream after being yielded.
pub(crate) fn parse_sse<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();

        for await chunk in bytes {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            buffer.extend_from_slice(chunk.as_ref());

            let (events, rest) = {
                let Some((completed, incomplete)) = rsplit_once_terminator(&buffer) else {
                    continue;
                };

                let events = split_events(completed)
                    .into_iter()
                    .filter_map(event_data)
                    .collect::<Vec<_>>();

                (events, incomplete.to_vec())
            };

            buffer = rest;

            for event in events {
                yield Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, executor::block_on};

    #[test]
    fn test_rsplit_once_terminator() {
        let buffer = b"data: 1\n\ndata: 2\n\ndata: incomplete mes";
        let (completed, incomplete) = rsplit_once_terminator(buffer).unwrap();
        assert_eq!(completed, b"data: 1\n\ndata: 2");
        assert_eq!(incomplete, b"data: incomplete mes");
    }

    #[test]
    fn test_event_data_joins_lines_and_skips_done() {
        assert_eq!(event_data(b"data: a\ndata: b"), Some("a\nb".to_string()));
        assert_eq!(event_data(b": comment"), None);
        assert_eq!(event_data(b"data: [DONE]"), None);
    }

    #[test]
    fn test_parse_sse_across_chunk_boundaries() {
        let chunks: Vec<Result<&[u8], ()>> = vec![
            Ok(b"data: 1\n\nda"),
            Ok(b"ta: 2\n\ndata: [DONE]\n\n"),
        ];

        let events = block_on(
            parse_sse(futures::stream::iter(chunks))
                .map(|e| e.unwrap())
                .collect::<Vec<_>>(),
        );

        assert_eq!(events, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_parse_sse_yields_error_and_stops() {
        let chunks: Vec<Result<&[u8], &str>> = vec![Ok(b"data: 1\n\n"), Err("boom"), Ok(b"data: 2\n\n")];

        let events = block_on(parse_sse(futures::stream::iter(chunks)).collect::<Vec<_>>());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_deref(), Ok("1"));
        assert_eq!(events[1], Err("boom"));
    }
}
