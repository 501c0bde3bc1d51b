//! Line-delimited stdio binding
//!
//! One JSON object per line in, one per line out. Lines are handled in
//! arrival order; each runs on its own task so a panicking request is
//! logged and answered instead of killing the loop.

use mcp_common::{internal_error, parse_error};
use mcp_common::jsonrpc::Response;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::dispatcher::Dispatcher;

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioExit {
    /// The input stream reached end of file
    InputClosed,
    /// Shutdown was requested
    Shutdown,
}

/// Serve requests from `reader` until end of input or shutdown
///
/// Only I/O errors end the loop; a line that is not UTF-8 is answered with
/// a ParseError like any other undecodable line.
pub async fn serve<R, W>(
    dispatcher: Dispatcher,
    mut reader: R,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<StdioExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    tracing::info!("stdio transport ready");

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = shutdown.wait_for(|stop| *stop) => return Ok(StdioExit::Shutdown),
        };
        if read == 0 {
            tracing::info!("stdin closed");
            return Ok(StdioExit::InputClosed);
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end_matches(['\n', '\r']).to_string(),
            Err(e) => {
                tracing::debug!("Rejecting non UTF-8 line: {}", e);
                let reply = Response::failure(Value::Null, parse_error(e.to_string()));
                write_reply(&mut writer, &reply).await?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let d = dispatcher.clone();
        let task = tokio::spawn(async move { d.handle_text(&line).await });
        let reply = match task.await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Request task failed: {}", e);
                Some(Response::failure(
                    Value::Null,
                    internal_error("Request handler failed"),
                ))
            }
        };

        if let Some(reply) = reply {
            write_reply(&mut writer, &reply).await?;
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = serde_json::to_vec(reply)?;
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::tools::tests::context_with;
    use crate::tools::ToolRegistry;
    use tokio::io::{AsyncReadExt, BufReader};

    async fn run(input: &str) -> (StdioExit, Vec<Value>) {
        run_bytes(input.as_bytes()).await
    }

    async fn run_bytes(input: &[u8]) -> (StdioExit, Vec<Value>) {
        let dispatcher = Dispatcher::new(ToolRegistry::builtin(), context_with(ServerConfig::default()));
        let (_tx, rx) = watch::channel(false);
        let (out_writer, mut out_reader) = tokio::io::duplex(64 * 1024);

        let exit = serve(dispatcher, BufReader::new(input), out_writer, rx)
            .await
            .unwrap();

        let mut output = String::new();
        out_reader.read_to_string(&mut output).await.unwrap();
        let replies = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (exit, replies)
    }

    #[tokio::test]
    async fn test_replies_in_order_and_skips_notifications() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
        );
        let (exit, replies) = run(input).await;

        assert_eq!(exit, StdioExit::InputClosed);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_the_loop() {
        let input = concat!(
            "this is not json\n",
            r#"{"jsonrpc":"2.0","id":7,"method":"prompts/list"}"#, "\n",
        );
        let (_, replies) = run(input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert_eq!(replies[1]["id"], 7);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_a_parse_error() {
        let mut input = b"{\"x\":\"\xff\xfe\"}\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":3,"method":"prompts/list"}"#);
        input.extend_from_slice(b"\r\n");

        let (exit, replies) = run_bytes(&input).await;

        assert_eq!(exit, StdioExit::InputClosed);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert_eq!(replies[1]["id"], 3);
        assert!(replies[1]["result"]["prompts"].is_array());
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_served() {
        let (_, replies) = run(r#"{"jsonrpc":"2.0","id":9,"method":"prompts/list"}"#).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], 9);
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_for_input() {
        let dispatcher = Dispatcher::new(ToolRegistry::builtin(), context_with(ServerConfig::default()));
        let (tx, rx) = watch::channel(false);
        // Input that never ends
        let (_keep_open, input) = tokio::io::duplex(64);
        let task = tokio::spawn(serve(dispatcher, BufReader::new(input), tokio::io::sink(), rx));

        tx.send_replace(true);
        assert_eq!(task.await.unwrap().unwrap(), StdioExit::Shutdown);
    }
}
