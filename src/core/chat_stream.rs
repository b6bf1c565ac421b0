//! One streaming chat completion exchange.
//!
//! A [`StreamSession`] sends the request, decodes the response body line by
//! line and reports what happened to a single [`StreamSubscriber`] as
//! [`StreamEvent`]s. Every session ends in exactly one terminal event, and no
//! event follows it.

use std::error::Error as StdError;
use std::fmt;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ChatMessage, ChatRequest};
use crate::core::config::Config;
use crate::core::constants::{MAX_TOKENS, TOP_P};
use crate::core::error::{http_error_message, MissingSettings, StreamError};
use crate::core::frame::{interpret, Frame};
use crate::core::line_decoder::LineDecoder;
use crate::core::message::{ConversationId, MessageId};
use crate::utils::url::construct_chat_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self != SessionState::Open
    }
}

/// The placeholder message a session writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta { target: StreamTarget, text: String },
    Completed { target: StreamTarget },
    /// Cancelled by the user. Content delivered so far stays.
    Aborted { target: StreamTarget },
    Failed { target: StreamTarget, error: StreamError },
}

impl StreamEvent {
    pub fn target(&self) -> StreamTarget {
        match self {
            StreamEvent::Delta { target, .. }
            | StreamEvent::Completed { target }
            | StreamEvent::Aborted { target }
            | StreamEvent::Failed { target, .. } => *target,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta { .. })
    }
}

pub trait StreamSubscriber {
    fn on_event(&mut self, event: StreamEvent);
}

/// Cancels the session it was taken from. Cloneable and idempotent; has no
/// effect once the session is terminal.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cancel_token: CancellationToken,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

enum Outcome {
    Completed,
    Aborted,
    Failed(StreamError),
}

pub struct StreamSession {
    target: StreamTarget,
    config: Config,
    api_messages: Vec<ChatMessage>,
    cancel_token: CancellationToken,
    state: SessionState,
    invalid_config: Option<MissingSettings>,
    deltas_delivered: usize,
}

impl StreamSession {
    /// Snapshot `config` and prepare an exchange for `target`.
    ///
    /// If a required setting is blank the session starts out `Failed`; the
    /// configuration error is reported on the first `run` and no request is
    /// sent.
    pub fn new(target: StreamTarget, config: &Config, api_messages: Vec<ChatMessage>) -> Self {
        let invalid_config = config.missing_settings();
        let state = if invalid_config.is_some() {
            SessionState::Failed
        } else {
            SessionState::Open
        };

        Self {
            target,
            config: config.clone(),
            api_messages,
            cancel_token: CancellationToken::new(),
            state,
            invalid_config,
            deltas_delivered: 0,
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn deltas_delivered(&self) -> usize {
        self.deltas_delivered
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel_token: self.cancel_token.clone(),
        }
    }

    pub fn url(&self) -> String {
        construct_chat_url(&self.config.endpoint, &self.config.deployment)
    }

    pub fn request_body(&self) -> ChatRequest {
        ChatRequest {
            messages: self.api_messages.clone(),
            max_tokens: MAX_TOKENS,
            temperature: self.config.effective_temperature(),
            top_p: TOP_P,
            stream: true,
        }
    }

    /// Send the request and stream the response into `subscriber`.
    pub async fn run<S>(&mut self, client: &reqwest::Client, subscriber: &mut S) -> SessionState
    where
        S: StreamSubscriber + ?Sized,
    {
        if let Some(state) = self.report_invalid_config(subscriber) {
            return state;
        }
        if self.state.is_terminal() {
            return self.state;
        }

        let url = self.url();
        info!(
            target_message = %self.target.message_id,
            deployment = %self.config.deployment,
            messages = self.api_messages.len(),
            "Starting chat completion stream"
        );

        let http_request = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("api-key", self.config.api_key.as_str())
            .json(&self.request_body());

        let cancel_token = self.cancel_token.clone();
        let sent = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return self.resolve(subscriber, Outcome::Aborted),
            sent = http_request.send() => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                let error = StreamError::Transport(describe_transport_error(&err));
                return self.resolve(subscriber, Outcome::Failed(error));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return self.resolve(subscriber, Outcome::Aborted),
                body = response.text() => body.unwrap_or_default(),
            };
            let message = http_error_message(status.as_u16(), &body);
            warn!(status = status.as_u16(), %message, "Chat completion request rejected");
            let error = StreamError::Http {
                status: status.as_u16(),
                message,
            };
            return self.resolve(subscriber, Outcome::Failed(error));
        }

        self.pump(response.bytes_stream(), subscriber).await
    }

    /// Decode an already-open response body into `subscriber`.
    ///
    /// Ends `Completed` at the terminator frame or when `body` is exhausted,
    /// `Aborted` when cancelled, and `Failed` on the first read error.
    pub async fn pump<St, B, E, S>(&mut self, mut body: St, subscriber: &mut S) -> SessionState
    where
        St: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: fmt::Display,
        S: StreamSubscriber + ?Sized,
    {
        if let Some(state) = self.report_invalid_config(subscriber) {
            return state;
        }
        if self.state.is_terminal() {
            return self.state;
        }

        let cancel_token = self.cancel_token.clone();
        let mut decoder = LineDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return self.resolve(subscriber, Outcome::Aborted),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for line in decoder.feed(chunk.as_ref()) {
                        self.dispatch_line(&line, subscriber);
                        if self.state.is_terminal() {
                            return self.state;
                        }
                    }
                }
                Some(Err(err)) => {
                    let error = StreamError::Transport(format!("Stream interrupted: {err}"));
                    return self.resolve(subscriber, Outcome::Failed(error));
                }
                None => break,
            }
        }

        if let Some(tail) = decoder.flush() {
            self.dispatch_line(&tail, subscriber);
            if self.state.is_terminal() {
                return self.state;
            }
        }

        self.resolve(subscriber, Outcome::Completed)
    }

    fn dispatch_line<S>(&mut self, line: &str, subscriber: &mut S)
    where
        S: StreamSubscriber + ?Sized,
    {
        // The subscriber may cancel from inside a delta callback.
        if self.cancel_token.is_cancelled() {
            self.resolve(subscriber, Outcome::Aborted);
            return;
        }

        match interpret(line) {
            Frame::Ignore => {}
            Frame::Terminate => {
                self.resolve(subscriber, Outcome::Completed);
            }
            Frame::TextDelta(text) => {
                self.deltas_delivered += 1;
                subscriber.on_event(StreamEvent::Delta {
                    target: self.target,
                    text,
                });
            }
        }
    }

    fn report_invalid_config<S>(&mut self, subscriber: &mut S) -> Option<SessionState>
    where
        S: StreamSubscriber + ?Sized,
    {
        let missing = self.invalid_config.take()?;
        warn!(missing = ?missing.fields, "Refusing to stream without required settings");
        subscriber.on_event(StreamEvent::Failed {
            target: self.target,
            error: StreamError::Configuration(missing),
        });
        Some(self.state)
    }

    fn resolve<S>(&mut self, subscriber: &mut S, outcome: Outcome) -> SessionState
    where
        S: StreamSubscriber + ?Sized,
    {
        if self.state.is_terminal() {
            return self.state;
        }

        let target = self.target;
        let (state, event) = match outcome {
            Outcome::Completed => (SessionState::Completed, StreamEvent::Completed { target }),
            Outcome::Aborted => (SessionState::Aborted, StreamEvent::Aborted { target }),
            Outcome::Failed(error) => (SessionState::Failed, StreamEvent::Failed { target, error }),
        };
        self.state = state;
        debug!(
            target_message = %target.message_id,
            state = ?state,
            deltas = self.deltas_delivered,
            "Chat completion stream finished"
        );
        subscriber.on_event(event);
        state
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    let mut message = format!("Network error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use futures_util::stream;
    use std::io;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TARGET: StreamTarget = StreamTarget {
        conversation_id: ConversationId(1),
        message_id: MessageId(3),
    };

    #[derive(Default)]
    struct Recorder {
        events: Vec<StreamEvent>,
        cancel_on_delta: Option<(usize, SessionHandle)>,
    }

    impl StreamSubscriber for Recorder {
        fn on_event(&mut self, event: StreamEvent) {
            let is_delta = matches!(event, StreamEvent::Delta { .. });
            self.events.push(event);
            if let Some((after, handle)) = &self.cancel_on_delta {
                if is_delta && self.deltas().len() >= *after {
                    handle.cancel();
                    handle.cancel();
                }
            }
        }
    }

    impl Recorder {
        fn deltas(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|event| match event {
                    StreamEvent::Delta { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }

        fn terminal(&self) -> Vec<&StreamEvent> {
            self.events.iter().filter(|e| e.is_terminal()).collect()
        }
    }

    fn delta_line(text: &str) -> String {
        let payload = serde_json::json!({"choices": [{"delta": {"content": text}}]});
        format!("data: {payload}\n\n")
    }

    fn configured(endpoint: &str) -> Config {
        Config {
            api_key: "test-key".into(),
            endpoint: endpoint.into(),
            deployment: "demo".into(),
            temperature: 0.4,
            ..Default::default()
        }
    }

    fn session() -> StreamSession {
        StreamSession::new(
            TARGET,
            &configured("https://example.invalid"),
            vec![ChatMessage::new(Role::User, "hi")],
        )
    }

    fn body(parts: Vec<String>) -> impl Stream<Item = Result<Vec<u8>, io::Error>> + Unpin {
        stream::iter(parts.into_iter().map(|part| Ok(part.into_bytes())))
    }

    #[tokio::test]
    async fn deltas_then_done_complete_with_concatenated_text() {
        let mut session = session();
        let mut recorder = Recorder::default();
        let parts = vec![
            delta_line("Your"),
            delta_line(" order"),
            delta_line(" is on the way."),
            "data: [DONE]\n\n".to_string(),
        ];

        let state = session.pump(body(parts), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(recorder.deltas().concat(), "Your order is on the way.");
        assert_eq!(
            recorder.events.last(),
            Some(&StreamEvent::Completed { target: TARGET })
        );
        assert_eq!(recorder.terminal().len(), 1);
        assert_eq!(session.deltas_delivered(), 3);
    }

    #[tokio::test]
    async fn frames_split_across_chunks_are_reassembled() {
        let text = format!("{}{}data: [DONE]\n", delta_line("héllo "), delta_line("wörld 🦀"));
        let bytes = text.into_bytes();
        let chunks: Vec<Result<Vec<u8>, io::Error>> =
            bytes.chunks(7).map(|chunk| Ok(chunk.to_vec())).collect();

        let mut session = session();
        let mut recorder = Recorder::default();
        let state = session.pump(stream::iter(chunks), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(recorder.deltas(), vec!["héllo ", "wörld 🦀"]);
    }

    #[tokio::test]
    async fn nothing_is_dispatched_after_done() {
        let mut session = session();
        let mut recorder = Recorder::default();
        let parts = vec![
            format!("{}data: [DONE]\n{}", delta_line("kept"), delta_line("dropped")),
            delta_line("also dropped"),
        ];

        let state = session.pump(body(parts), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(recorder.deltas(), vec!["kept"]);
        assert_eq!(recorder.events.len(), 2);
    }

    #[tokio::test]
    async fn exhaustion_without_done_still_completes_and_flushes_tail() {
        let mut session = session();
        let mut recorder = Recorder::default();
        let unterminated = delta_line("tail").trim_end().to_string();
        let parts = vec![delta_line("head "), unterminated];

        let state = session.pump(body(parts), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(recorder.deltas(), vec!["head ", "tail"]);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let mut session = session();
        let mut recorder = Recorder::default();
        let parts = vec![
            ": keep-alive\n".to_string(),
            delta_line("a"),
            "data: {broken\n".to_string(),
            "data: {\"choices\":[]}\n".to_string(),
            delta_line("b"),
            "data: [DONE]\n".to_string(),
        ];

        let state = session.pump(body(parts), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(recorder.deltas(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn read_error_fails_once_and_stops_delivery() {
        let mut session = session();
        let mut recorder = Recorder::default();
        let chunks: Vec<Result<Vec<u8>, io::Error>> = vec![
            Ok(delta_line("partial").into_bytes()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
            Ok(delta_line("never").into_bytes()),
        ];

        let state = session.pump(stream::iter(chunks), &mut recorder).await;

        assert_eq!(state, SessionState::Failed);
        assert_eq!(recorder.deltas(), vec!["partial"]);
        match recorder.events.last() {
            Some(StreamEvent::Failed {
                error: StreamError::Transport(message),
                ..
            }) => assert!(message.contains("reset by peer")),
            other => panic!("expected transport failure, got {other:?}"),
        }
        assert_eq!(recorder.terminal().len(), 1);
    }

    #[tokio::test]
    async fn cancel_mid_stream_aborts_exactly_once() {
        let mut session = session();
        let mut recorder = Recorder {
            cancel_on_delta: Some((1, session.handle())),
            ..Default::default()
        };
        let parts = vec![
            format!("{}{}", delta_line("first"), delta_line("second")),
            delta_line("third"),
            "data: [DONE]\n".to_string(),
        ];

        let state = session.pump(body(parts), &mut recorder).await;

        assert_eq!(state, SessionState::Aborted);
        assert_eq!(recorder.deltas(), vec!["first"]);
        assert_eq!(recorder.terminal(), vec![&StreamEvent::Aborted { target: TARGET }]);
    }

    #[tokio::test]
    async fn cancel_before_first_read_aborts() {
        let mut session = session();
        let handle = session.handle();
        handle.cancel();
        let mut recorder = Recorder::default();

        let state = session.pump(body(vec![delta_line("x")]), &mut recorder).await;

        assert_eq!(state, SessionState::Aborted);
        assert!(recorder.deltas().is_empty());
        assert_eq!(recorder.events.len(), 1);
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let mut session = session();
        let handle = session.handle();
        let mut recorder = Recorder::default();
        session
            .pump(body(vec!["data: [DONE]\n".into()]), &mut recorder)
            .await;

        handle.cancel();
        handle.cancel();
        let state = session.pump(body(vec![delta_line("late")]), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(recorder.events, vec![StreamEvent::Completed { target: TARGET }]);
    }

    #[test]
    fn request_body_uses_config_snapshot() {
        let mut config = configured("https://res.openai.azure.com/");
        let session = StreamSession::new(
            TARGET,
            &config,
            vec![
                ChatMessage::new(Role::System, "sys"),
                ChatMessage::new(Role::User, "hi"),
            ],
        );
        config.deployment = "changed".into();
        config.temperature = 1.9;

        let body = session.request_body();
        assert_eq!(body.max_tokens, 4096);
        assert_eq!(body.temperature, 0.4);
        assert_eq!(body.top_p, 1.0);
        assert!(body.stream);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(
            session.url(),
            "https://res.openai.azure.com/openai/deployments/demo/chat/completions?api-version=2024-12-01-preview"
        );
    }

    // Loopback HTTP fixtures

    type CapturedRequest = (String, Vec<(String, String)>, Vec<u8>);

    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Result<CapturedRequest, String> {
        let mut buffer = Vec::new();
        let mut header_end = None;
        while header_end.is_none() {
            let mut chunk = [0_u8; 1024];
            let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
            if read == 0 {
                return Err("Unexpected EOF while reading HTTP headers".to_string());
            }
            buffer.extend_from_slice(&chunk[..read]);
            header_end = buffer
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
                .map(|index| index + 4);
        }

        let header_end = header_end.expect("header end should exist");
        let header_text =
            std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
        let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
        let request_line = lines
            .next()
            .ok_or_else(|| "Missing HTTP request line".to_string())?
            .to_string();

        let mut headers = Vec::new();
        let mut content_length = 0_usize;
        for line in lines {
            let mut parts = line.splitn(2, ':');
            let Some(name) = parts.next() else {
                continue;
            };
            let value = parts.next().unwrap_or_default().trim().to_string();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
            }
            headers.push((name.to_string(), value));
        }

        let mut body = buffer[header_end..].to_vec();
        while body.len() < content_length {
            let mut chunk = vec![0_u8; content_length - body.len()];
            let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
            if read == 0 {
                return Err("Unexpected EOF while reading HTTP body".to_string());
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(content_length);

        Ok((request_line, headers, body))
    }

    /// Serves one request: writes `head`, then each part with a pause, then
    /// either closes or holds the connection open.
    fn spawn_server(
        listener: TcpListener,
        head: String,
        parts: Vec<String>,
        hold_open: bool,
    ) -> tokio::task::JoinHandle<Result<CapturedRequest, String>> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let captured = read_http_request(&mut stream).await?;
            stream
                .write_all(head.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
            for part in parts {
                stream
                    .write_all(part.as_bytes())
                    .await
                    .map_err(|err| err.to_string())?;
                stream.flush().await.map_err(|err| err.to_string())?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            if hold_open {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let _ = stream.shutdown().await;
            Ok(captured)
        })
    }

    const STREAM_HEAD: &str =
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client should build")
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        (listener, format!("http://{addr}/"))
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[tokio::test]
    async fn streams_over_http_with_expected_request_shape() {
        let (listener, endpoint) = bind().await;
        let server = spawn_server(
            listener,
            STREAM_HEAD.to_string(),
            vec![
                delta_line("Hel"),
                delta_line("lo"),
                "data: [DONE]\n\n".to_string(),
            ],
            false,
        );

        let messages = vec![
            ChatMessage::new(Role::System, "sys"),
            ChatMessage::new(Role::User, "Where is my order?"),
        ];
        let mut session = StreamSession::new(TARGET, &configured(&endpoint), messages);
        let mut recorder = Recorder::default();
        let state = session.run(&client(), &mut recorder).await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(recorder.deltas().concat(), "Hello");

        let (request_line, headers, body) = server
            .await
            .expect("server task")
            .expect("server should capture request");
        assert_eq!(
            request_line,
            "POST /openai/deployments/demo/chat/completions?api-version=2024-12-01-preview HTTP/1.1"
        );
        assert_eq!(header(&headers, "api-key"), Some("test-key"));
        assert_eq!(header(&headers, "content-type"), Some("application/json"));

        let body: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(
            body,
            serde_json::json!({
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "Where is my order?"}
                ],
                "max_tokens": 4096,
                "temperature": 0.4,
                "top_p": 1.0,
                "stream": true
            })
        );
    }

    #[tokio::test]
    async fn http_error_reports_body_message_once() {
        let (listener, endpoint) = bind().await;
        let error_body = r#"{"error":{"message":"rate limited"}}"#;
        let head = format!(
            "HTTP/1.1 429 Too Many Requests\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            error_body.len(),
            error_body
        );
        let server = spawn_server(listener, head, Vec::new(), false);

        let mut session = StreamSession::new(TARGET, &configured(&endpoint), Vec::new());
        let mut recorder = Recorder::default();
        let state = session.run(&client(), &mut recorder).await;

        assert_eq!(state, SessionState::Failed);
        assert_eq!(
            recorder.events,
            vec![StreamEvent::Failed {
                target: TARGET,
                error: StreamError::Http {
                    status: 429,
                    message: "rate limited".into()
                }
            }]
        );
        server.await.expect("server task").expect("request captured");
    }

    #[tokio::test]
    async fn http_error_without_json_uses_generic_message() {
        let (listener, endpoint) = bind().await;
        let head =
            "HTTP/1.1 502 Bad Gateway\r\ncontent-length: 9\r\nconnection: close\r\n\r\nupstream!"
                .to_string();
        let server = spawn_server(listener, head, Vec::new(), false);

        let mut session = StreamSession::new(TARGET, &configured(&endpoint), Vec::new());
        let mut recorder = Recorder::default();
        session.run(&client(), &mut recorder).await;

        match recorder.events.as_slice() {
            [StreamEvent::Failed { error, .. }] => assert_eq!(error.to_string(), "API error 502"),
            other => panic!("expected one failure, got {other:?}"),
        }
        server.await.expect("server task").expect("request captured");
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_failure() {
        let (listener, endpoint) = bind().await;
        drop(listener);

        let mut session = StreamSession::new(TARGET, &configured(&endpoint), Vec::new());
        let mut recorder = Recorder::default();
        let state = session.run(&client(), &mut recorder).await;

        assert_eq!(state, SessionState::Failed);
        assert!(matches!(
            recorder.events.as_slice(),
            [StreamEvent::Failed {
                error: StreamError::Transport(_),
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn missing_settings_fail_without_network() {
        let (listener, endpoint) = bind().await;
        let config = Config {
            api_key: String::new(),
            ..configured(&endpoint)
        };
        let mut session = StreamSession::new(TARGET, &config, Vec::new());
        assert_eq!(session.state(), SessionState::Failed);

        let mut recorder = Recorder::default();
        let state = session.run(&client(), &mut recorder).await;
        assert_eq!(state, SessionState::Failed);
        match recorder.events.as_slice() {
            [StreamEvent::Failed {
                error: StreamError::Configuration(missing),
                ..
            }] => assert_eq!(missing.fields, vec!["api-key"]),
            other => panic!("expected configuration failure, got {other:?}"),
        }

        // Reported once only.
        session.run(&client(), &mut recorder).await;
        assert_eq!(recorder.events.len(), 1);

        let accepted =
            tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err(), "no connection should have been made");
    }

    #[tokio::test]
    async fn cancel_while_server_is_still_streaming() {
        let (listener, endpoint) = bind().await;
        let server = spawn_server(
            listener,
            STREAM_HEAD.to_string(),
            vec![delta_line("partial answer")],
            true,
        );

        let mut session = StreamSession::new(TARGET, &configured(&endpoint), Vec::new());
        let mut recorder = Recorder {
            cancel_on_delta: Some((1, session.handle())),
            ..Default::default()
        };
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            session.run(&client(), &mut recorder),
        )
        .await
        .expect("cancel should end the session promptly");

        assert_eq!(state, SessionState::Aborted);
        assert_eq!(recorder.deltas(), vec!["partial answer"]);
        assert_eq!(recorder.terminal(), vec![&StreamEvent::Aborted { target: TARGET }]);
        server.abort();
    }

    #[tokio::test]
    async fn cancel_from_another_task_while_waiting_for_headers() {
        let (listener, endpoint) = bind().await;
        // Accepts but never answers.
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let _ = read_http_request(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), String>(())
        });

        let mut session = StreamSession::new(TARGET, &configured(&endpoint), Vec::new());
        let handle = session.handle();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let mut recorder = Recorder::default();
        let state = session.run(&client(), &mut recorder).await;

        assert_eq!(state, SessionState::Aborted);
        assert_eq!(recorder.events, vec![StreamEvent::Aborted { target: TARGET }]);
        canceller.await.expect("canceller task");
        server.abort();
    }
}
