//! Alert delivery channels.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, warn};

use super::Alert;
use crate::cancel::CancelToken;

/// A destination for alerts that passed the alerter's filters.
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// One line per alert on stderr.
pub struct StderrChannel;

impl Channel for StderrChannel {
    fn name(&self) -> &str {
        "stderr"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        eprintln!("{}", alert.one_line());
        Ok(())
    }
}

/// POSTs the alert as JSON. Server errors (5xx) and transport failures are
/// retried up to `retries` extra times; client errors fail at once.
pub struct WebhookChannel {
    url: String,
    agent: ureq::Agent,
    retries: u32,
    backoff: Duration,
    cancel: CancelToken,
}

impl WebhookChannel {
    pub fn new(url: &str, timeout: Duration, retries: u32, cancel: CancelToken) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.to_string(),
            agent,
            retries,
            backoff: Duration::from_millis(200),
            cancel,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        let body = serde_json::to_value(alert)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.agent.post(&self.url).send_json(body.clone()) {
                Ok(_) => {
                    debug!(url = %self.url, attempt, "webhook delivered");
                    return Ok(());
                }
                Err(ureq::Error::Status(code, _)) if code < 500 => {
                    bail!("webhook rejected alert with status {code}");
                }
                Err(ureq::Error::Status(code, _)) => anyhow!("webhook returned status {code}"),
                Err(ureq::Error::Transport(t)) => anyhow!("webhook transport error: {t}"),
            };
            if attempt > self.retries {
                return Err(err.context(format!("giving up after {attempt} attempt(s)")));
            }
            warn!(url = %self.url, attempt, error = %err, "webhook failed; retrying");
            self.cancel.sleep(self.backoff)?;
        }
    }
}

/// Native desktop notification (`notify-send` or `osascript`).
pub struct DesktopChannel;

impl Channel for DesktopChannel {
    fn name(&self) -> &str {
        "desktop"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        let title = format!("panectl: {}", alert.alert_type);
        let body = alert.one_line();
        let status = if cfg!(target_os = "macos") {
            let script = format!(
                r#"display notification "{}" with title "{}""#,
                body.replace('"', r#"\""#),
                title.replace('"', r#"\""#)
            );
            Command::new("osascript").args(["-e", &script]).status()
        } else {
            Command::new("notify-send").args([&title, &body]).status()
        };
        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => bail!("desktop notifier exited with {s}"),
            Err(e) => bail!("desktop notifier unavailable: {e}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertType;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serve `statuses` in order, one per connection, counting requests.
    fn serve(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        std::thread::spawn(move || {
            for status in statuses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(v) = lower.strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body);
                counter.fetch_add(1, Ordering::SeqCst);
                let mut stream = reader.into_inner();
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
            }
        });
        (url, hits)
    }

    fn alert() -> Alert {
        Alert::new(AlertType::Unhealthy, "proj", "pane crashed").with_pane("1.2")
    }

    #[test]
    fn webhook_retries_server_errors() {
        let (url, hits) = serve(vec![503, 500, 200]);
        let channel = WebhookChannel::new(&url, Duration::from_secs(2), 2, CancelToken::new())
            .with_backoff(Duration::from_millis(1));
        channel.deliver(&alert()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn webhook_gives_up_after_retries() {
        let (url, hits) = serve(vec![502, 502]);
        let channel = WebhookChannel::new(&url, Duration::from_secs(2), 1, CancelToken::new())
            .with_backoff(Duration::from_millis(1));
        assert!(channel.deliver(&alert()).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn webhook_does_not_retry_client_errors() {
        let (url, hits) = serve(vec![400, 200]);
        let channel = WebhookChannel::new(&url, Duration::from_secs(2), 3, CancelToken::new())
            .with_backoff(Duration::from_millis(1));
        assert!(channel.deliver(&alert()).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
