//! One-shot chat: send a prompt, stream the reply, print the result.
//!
//! Progress (raw deltas, status, errors) goes to stderr. The final message
//! goes to stdout, as an HTML fragment or as raw markdown.

use std::io::Write;

use cw_backend::{ChatClient, ClientError, StreamHandler};
use cw_protocol::ChatTurn;
use futures::StreamExt;

use crate::config::Config;
use crate::history::ConversationHistory;
use crate::orchestrator::ChatSession;
use crate::view::{HtmlView, ProgressOutput};

/// Command-line switches that shape a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Print the final markdown instead of HTML.
    pub raw: bool,
    /// Skip loading and saving history.
    pub no_history: bool,
    /// Print each protocol event instead of rendering.
    pub events: bool,
}

pub fn build_client(config: &Config) -> Result<ChatClient, ClientError> {
    let endpoint = &config.endpoint;
    let mut client = ChatClient::new(&endpoint.base_url, &endpoint.endpoint_id)?
        .with_feature_flags(endpoint.feature_flags.clone());
    if let Some(key) = endpoint.resolve_api_key() {
        client = client.with_api_key(key);
    }
    Ok(client)
}

fn open_history<W: Write>(
    config: &Config,
    opts: &RunOptions,
    output: &mut ProgressOutput<W>,
) -> ConversationHistory {
    if opts.no_history || !config.history.enabled {
        return ConversationHistory::noop();
    }
    let path = config.history.resolve_path();
    match ConversationHistory::open(path.clone(), config.history.max_messages) {
        Ok(history) => history,
        Err(e) => {
            output.emit_error(&format!("history {}: {e}", path.display()));
            ConversationHistory::noop()
        }
    }
}

/// Run one prompt against the configured endpoint. Returns the exit code.
pub async fn run_chat(config: &Config, prompt: &str, opts: &RunOptions) -> i32 {
    let mut output = ProgressOutput::new(std::io::stderr());

    let client = match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            output.emit_error(&e.to_string());
            return 1;
        }
    };

    let history = open_history(config, opts, &mut output);
    let mut session = ChatSession::from_config(config, history);

    if opts.events {
        let turns = session.context_turns(prompt);
        return print_events(&client, &turns, &mut output).await;
    }

    let turns = session.begin_user_turn(prompt);

    let mut view = HtmlView::new("assistant");
    let outcome = if config.endpoint.streaming {
        let mut stream = session.stream_into(&mut view);
        let mut handlers = (&mut stream, &mut output);
        client.send_streaming(&turns, &mut handlers).await.map(drop)
    } else {
        match client.send(&turns).await {
            Ok(result) => {
                let mut stream = session.stream_into(&mut view);
                stream.on_complete(&result);
                output.on_complete(&result);
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    match outcome {
        Ok(()) => {}
        // Handlers already reported stream failures.
        Err(ClientError::Stream(_)) => return 1,
        Err(e) => {
            session.abandon_turn(&e.to_string());
            output.emit_error(&e.to_string());
            return 1;
        }
    }

    if opts.raw {
        if let Some(message) = session.messages().last() {
            println!("{}", message.content);
        }
    } else {
        println!("{}", view.fragment());
    }

    match session.history_mut().compact() {
        Ok(0) => {}
        Ok(n) => log::debug!("history compacted, {n} messages dropped"),
        Err(e) => log::warn!("history compaction failed: {e}"),
    }
    0
}

async fn print_events<W: Write>(
    client: &ChatClient,
    turns: &[ChatTurn],
    output: &mut ProgressOutput<W>,
) -> i32 {
    let mut events = match client.event_stream(turns).await {
        Ok(events) => events,
        Err(e) => {
            output.emit_error(&e.to_string());
            return 1;
        }
    };

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                println!("{event:?}");
                if event.is_terminal() {
                    break;
                }
            }
            Err(e) => {
                output.emit_error(&format!("transport failure: {e}"));
                return 1;
            }
        }
    }
    0
}
