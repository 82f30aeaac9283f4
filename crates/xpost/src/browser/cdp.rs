use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use super::{BrowserCookie, BrowserError, BrowsingContext};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A DevTools websocket with request/response correlation.
///
/// Commands are sent one at a time; events received while waiting for a
/// response are buffered so a later [`CdpConnection::wait_for_event`] can
/// still observe them.
pub(crate) struct CdpConnection {
    ws: WsStream,
    next_id: u64,
    events: VecDeque<Value>,
    command_timeout: Duration,
}

impl CdpConnection {
    pub(crate) async fn connect(url: &str, command_timeout: Duration) -> Result<Self, BrowserError> {
        let (ws, _) = tokio::time::timeout(command_timeout, connect_async(url))
            .await
            .map_err(|_| BrowserError::Timeout("devtools connect".to_string()))?
            .map_err(|e| BrowserError::Connect(e.to_string()))?;
        debug!(url, "Connected to DevTools");

        Ok(Self {
            ws,
            next_id: 0,
            events: VecDeque::new(),
            command_timeout,
        })
    }

    async fn next_message(&mut self) -> Result<Value, BrowserError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => return Ok(value),
                    Err(e) => trace!(error = %e, "Ignoring non-JSON DevTools frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Err(BrowserError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(BrowserError::Connect(e.to_string())),
            }
        }
    }

    /// Send one command and wait for its response.
    pub(crate) async fn call(
        &mut self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, BrowserError> {
        self.next_id += 1;
        let id = self.next_id;

        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            request["sessionId"] = Value::String(session_id.to_string());
        }
        trace!(id, method, "DevTools command");

        self.ws
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| BrowserError::Connect(e.to_string()))?;

        let timeout = self.command_timeout;
        let response = tokio::time::timeout(timeout, async {
            loop {
                let message = self.next_message().await?;
                if message.get("id").and_then(Value::as_u64) == Some(id) {
                    return Ok::<_, BrowserError>(message);
                }
                if message.get("method").is_some() {
                    self.events.push_back(message);
                }
            }
        })
        .await
        .map_err(|_| BrowserError::Timeout(method.to_string()))??;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(BrowserError::Protocol {
                method: method.to_string(),
                message,
            });
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Wait for an event, checking events buffered during earlier commands first.
    pub(crate) async fn wait_for_event(
        &mut self,
        method: &str,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let matches = |event: &Value| {
            event.get("method").and_then(Value::as_str) == Some(method)
                && (session_id.is_none()
                    || event.get("sessionId").and_then(Value::as_str) == session_id)
        };

        if let Some(pos) = self.events.iter().position(|e| matches(e)) {
            return Ok(self.events.remove(pos).unwrap_or(Value::Null));
        }

        tokio::time::timeout(timeout, async {
            loop {
                let message = self.next_message().await?;
                if matches(&message) {
                    return Ok(message);
                }
            }
        })
        .await
        .map_err(|_| BrowserError::Timeout(method.to_string()))?
    }

    pub(crate) fn clear_events(&mut self) {
        self.events.clear();
    }

    pub(crate) async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A page inside its own browser context, in a browser process owned by this value.
///
/// Dropping it without [`BrowsingContext::close`] still kills the process
/// (the child is spawned with `kill_on_drop`) and deletes the profile directory.
pub struct CdpContext {
    conn: CdpConnection,
    child: Child,
    // Removed on drop, after the process is gone.
    _profile: TempDir,
    browser_context_id: String,
    session_id: String,
    load_timeout: Duration,
    closed: bool,
}

impl CdpContext {
    /// Create an isolated browser context with one attached page.
    pub(crate) async fn open(
        mut conn: CdpConnection,
        child: Child,
        profile: TempDir,
        load_timeout: Duration,
    ) -> Result<Self, BrowserError> {
        let created = conn
            .call("Target.createBrowserContext", json!({ "disposeOnDetach": true }), None)
            .await?;
        let browser_context_id = string_field(&created, "browserContextId", "Target.createBrowserContext")?;

        let target = conn
            .call(
                "Target.createTarget",
                json!({ "url": "about:blank", "browserContextId": browser_context_id }),
                None,
            )
            .await?;
        let target_id = string_field(&target, "targetId", "Target.createTarget")?;

        let attached = conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = string_field(&attached, "sessionId", "Target.attachToTarget")?;

        conn.call("Page.enable", json!({}), Some(&session_id)).await?;
        conn.call("Network.enable", json!({}), Some(&session_id)).await?;
        debug!(%browser_context_id, %target_id, "Opened isolated browsing context");

        Ok(Self {
            conn,
            child,
            _profile: profile,
            browser_context_id,
            session_id,
            load_timeout,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    async fn wait_for_load(&mut self) -> Result<(), BrowserError> {
        let session_id = self.session_id.clone();
        self.conn
            .wait_for_event("Page.loadEventFired", Some(&session_id), self.load_timeout)
            .await
            .map(|_| ())
    }
}

fn string_field(value: &Value, field: &str, method: &str) -> Result<String, BrowserError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| BrowserError::Protocol {
            method: method.to_string(),
            message: format!("response has no {field}"),
        })
}

#[async_trait]
impl BrowsingContext for CdpContext {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.conn.clear_events();
        let session_id = self.session_id.clone();

        let result = self
            .conn
            .call("Page.navigate", json!({ "url": url }), Some(&session_id))
            .await?;
        if let Some(reason) = result.get("errorText").and_then(Value::as_str) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }

        self.wait_for_load().await
    }

    async fn reload(&mut self) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.conn.clear_events();
        let session_id = self.session_id.clone();
        self.conn
            .call("Page.reload", json!({ "ignoreCache": false }), Some(&session_id))
            .await?;
        self.wait_for_load().await
    }

    async fn set_cookie(&mut self, cookie: &BrowserCookie) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let session_id = self.session_id.clone();
        let mut params = json!({
            "name": cookie.name,
            "value": cookie.value,
            "domain": cookie.domain,
            "path": cookie.path,
            "secure": cookie.secure,
            "httpOnly": cookie.http_only,
        });
        if let Some(expires) = cookie.expires {
            params["expires"] = json!(expires);
        }

        let result = self
            .conn
            .call("Network.setCookie", params, Some(&session_id))
            .await?;
        // Older browsers report success explicitly, newer ones return an empty object.
        if result.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(BrowserError::Protocol {
                method: "Network.setCookie".to_string(),
                message: format!("cookie {} rejected", cookie.name),
            });
        }
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
        self.ensure_open()?;
        let result = self
            .conn
            .call(
                "Storage.getCookies",
                json!({ "browserContextId": self.browser_context_id }),
                None,
            )
            .await?;

        let cookies = result.get("cookies").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(cookies).map_err(|e| BrowserError::Protocol {
            method: "Storage.getCookies".to_string(),
            message: e.to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self
            .conn
            .call(
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.browser_context_id }),
                None,
            )
            .await
        {
            debug!(error = %e, "Failed to dispose browser context");
        }
        let _ = self.conn.call("Browser.close", json!({}), None).await;
        self.conn.close().await;

        // Browser.close normally ends the process; make sure of it.
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Browser exited"),
            _ => {
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "Failed to kill browser process");
                    return Err(BrowserError::Io(e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serve one DevTools client, answering each command with the frames `script` returns.
    async fn spawn_devtools<F>(script: F) -> String
    where
        F: Fn(&str, &Value) -> Vec<Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                for frame in script(&method, &request) {
                    if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                        return;
                    }
                }
            }
        });
        format!("ws://{addr}/devtools/browser/test")
    }

    fn reply(request: &Value, result: Value) -> Value {
        json!({ "id": request["id"], "result": result })
    }

    fn event(method: &str, session_id: &str) -> Value {
        json!({ "method": method, "params": {}, "sessionId": session_id })
    }

    /// Answers the commands a [`CdpContext`] sends over its lifetime.
    #[cfg(unix)]
    fn browser_script(method: &str, request: &Value) -> Vec<Value> {
        match method {
            "Target.createBrowserContext" => vec![reply(request, json!({ "browserContextId": "ctx1" }))],
            "Target.createTarget" => vec![reply(request, json!({ "targetId": "t1" }))],
            "Target.attachToTarget" => vec![
                event("Target.attachedToTarget", "s1"),
                reply(request, json!({ "sessionId": "s1" })),
            ],
            // The load event arrives before the command response.
            "Page.navigate" | "Page.reload" => vec![
                event("Page.frameStartedLoading", "s1"),
                event("Page.loadEventFired", "s1"),
                reply(request, json!({ "frameId": "f1" })),
            ],
            "Network.setCookie" if request["params"]["name"] == "blocked" => {
                vec![reply(request, json!({ "success": false }))]
            }
            "Storage.getCookies" => vec![reply(
                request,
                json!({ "cookies": [
                    { "name": "auth_token", "value": "abc", "domain": ".x.com", "path": "/",
                      "expires": -1, "httpOnly": true, "secure": true, "size": 13 },
                    { "name": "ct0", "value": "csrf1", "domain": ".x.com" },
                ]}),
            )],
            _ => vec![reply(request, json!({}))],
        }
    }

    #[cfg(unix)]
    async fn open_context(url: &str) -> CdpContext {
        let conn = CdpConnection::connect(url, TIMEOUT).await.unwrap();
        let child = tokio::process::Command::new("true")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let profile = tempfile::tempdir().unwrap();
        CdpContext::open(conn, child, profile, TIMEOUT).await.unwrap()
    }

    #[tokio::test]
    async fn test_call_skips_stale_responses_and_buffers_events() {
        let url = spawn_devtools(|_, request| {
            vec![
                json!({ "id": 999, "result": { "stale": true } }),
                event("Network.requestWillBeSent", "s1"),
                reply(request, json!({ "value": request["id"] })),
            ]
        })
        .await;
        let mut conn = CdpConnection::connect(&url, TIMEOUT).await.unwrap();

        let first = conn.call("Runtime.evaluate", json!({}), Some("s1")).await.unwrap();
        let second = conn.call("Runtime.evaluate", json!({}), Some("s1")).await.unwrap();
        assert_eq!(first, json!({ "value": 1 }));
        assert_eq!(second, json!({ "value": 2 }));

        // Served from the buffer; the server sends nothing more.
        let buffered = conn
            .wait_for_event("Network.requestWillBeSent", Some("s1"), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(buffered["sessionId"], "s1");
    }

    #[tokio::test]
    async fn test_wait_for_event_filters_by_session() {
        let url = spawn_devtools(|_, request| {
            vec![
                reply(request, json!({})),
                event("Page.loadEventFired", "other"),
                event("Page.loadEventFired", "s1"),
            ]
        })
        .await;
        let mut conn = CdpConnection::connect(&url, TIMEOUT).await.unwrap();
        conn.call("Page.enable", json!({}), Some("s1")).await.unwrap();

        let loaded = conn
            .wait_for_event("Page.loadEventFired", Some("s1"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(loaded["sessionId"], "s1");

        let err = conn
            .wait_for_event("Page.loadEventFired", Some("s1"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_protocol_error_is_reported() {
        let url = spawn_devtools(|_, request| {
            vec![json!({
                "id": request["id"],
                "error": { "code": -32000, "message": "No target with given id found" },
            })]
        })
        .await;
        let mut conn = CdpConnection::connect(&url, TIMEOUT).await.unwrap();

        let err = conn
            .call("Target.attachToTarget", json!({ "targetId": "gone" }), None)
            .await
            .unwrap_err();
        match err {
            BrowserError::Protocol { method, message } => {
                assert_eq!(method, "Target.attachToTarget");
                assert_eq!(message, "No target with given id found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_close_ends_the_call() {
        let url = spawn_devtools(|_, _| vec![]).await;
        let mut conn = CdpConnection::connect(&url, TIMEOUT).await.unwrap();
        conn.close().await;

        let err = conn.call("Page.enable", json!({}), None).await.unwrap_err();
        assert!(matches!(err, BrowserError::Connect(_) | BrowserError::Closed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_context_navigates_when_load_event_precedes_response() {
        let url = spawn_devtools(browser_script).await;
        let mut context = open_context(&url).await;

        context.navigate("https://x.com").await.unwrap();
        context.reload().await.unwrap();
        context.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_context_cookies() {
        let url = spawn_devtools(browser_script).await;
        let mut context = open_context(&url).await;

        context
            .set_cookie(&BrowserCookie::session("auth_token", "abc", ".x.com"))
            .await
            .unwrap();
        let err = context
            .set_cookie(&BrowserCookie::new("blocked", "1", ".x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Protocol { ref method, .. } if method == "Network.setCookie"));

        let cookies = context.cookies().await.unwrap();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].http_only);
        assert_eq!(cookies[1].value, "csrf1");
        assert_eq!(cookies[1].path, "/");

        context.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_is_idempotent() {
        let url = spawn_devtools(browser_script).await;
        let mut context = open_context(&url).await;

        context.close().await.unwrap();
        context.close().await.unwrap();
        let err = context.navigate("https://x.com").await.unwrap_err();
        assert!(matches!(err, BrowserError::Closed));
    }
}
