//! # Telemetry
//!
//! Tracing setup and fault reporting.
//!
//! Server faults (upload staging failures, handlers that cannot be built)
//! go through [`FaultLog`], which emits each fault kind at most once per
//! window so a failing disk or dependency cannot flood the log. Occurrences
//! inside the window are counted and reported with the next emitted line.

use crate::collaborators::{Mail, Mailer};
use crate::config::LoggingConfig;
use crate::error::Error;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured filter. Later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Log an unrecoverable error and exit with status 1
pub fn fatal(message: impl Display) -> ! {
    error!(fatal = true, "{message}");
    std::process::exit(1)
}

struct Seen {
    last: Instant,
    suppressed: u64,
}

/// Deduplicating fault logger
pub struct FaultLog {
    window: Duration,
    seen: Mutex<HashMap<&'static str, Seen>>,
    mail: Option<(Arc<dyn Mailer>, String)>,
}

impl FaultLog {
    /// Log each fault kind at most once per `window`
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
            mail: None,
        }
    }

    /// Also mail every emitted fault to `admin`
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>, admin: impl Into<String>) -> Self {
        self.mail = Some((mailer, admin.into()));
        self
    }

    /// Report a fault; returns whether it was emitted
    pub fn report(&self, fault: &Error) -> bool {
        let code = fault.code();
        let now = Instant::now();

        let suppressed = {
            let mut seen = self.seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            match seen.get_mut(code) {
                Some(entry) if now.duration_since(entry.last) < self.window => {
                    entry.suppressed += 1;
                    return false;
                }
                Some(entry) => {
                    let suppressed = entry.suppressed;
                    entry.last = now;
                    entry.suppressed = 0;
                    suppressed
                }
                None => {
                    seen.insert(code, Seen { last: now, suppressed: 0 });
                    0
                }
            }
        };

        error!(
            error_code = code,
            suppressed,
            error = %fault,
            "Server fault"
        );

        if let Some((mailer, admin)) = &self.mail {
            let mail = Mail::new(
                admin.clone(),
                format!("Server fault: {code}"),
                format!("{fault}\n\nSuppressed since last report: {suppressed}"),
            );
            deliver(mailer.clone(), mail);
        }

        true
    }
}

/// Hand a fault report to the mailer off the calling task when a runtime is
/// available; mail transports block.
fn deliver(mailer: Arc<dyn Mailer>, mail: Mail) {
    let send = move || {
        if let Err(e) = mailer.send(&mail) {
            warn!(error = %e, to = %mail.to, "Failed to mail fault report");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(send);
        }
        Err(_) => send(),
    }
}

impl std::fmt::Debug for FaultLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultLog")
            .field("window", &self.window)
            .field("mail", &self.mail.as_ref().map(|(_, admin)| admin))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    fn upload_fault() -> Error {
        Error::Upload {
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Mail>>);

    impl Mailer for Outbox {
        fn send(&self, mail: &Mail) -> Result<()> {
            self.0.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    #[test]
    fn test_same_fault_deduplicated() {
        let log = FaultLog::new(Duration::from_secs(60));
        assert!(log.report(&upload_fault()));
        assert!(!log.report(&upload_fault()));
        assert!(!log.report(&upload_fault()));
    }

    #[test]
    fn test_different_codes_are_independent() {
        let log = FaultLog::new(Duration::from_secs(60));
        assert!(log.report(&upload_fault()));
        assert!(log.report(&Error::handler("boom")));
    }

    #[test]
    fn test_window_elapsed() {
        let log = FaultLog::new(Duration::ZERO);
        assert!(log.report(&upload_fault()));
        assert!(log.report(&upload_fault()));
    }

    #[test]
    fn test_mailer_receives_emitted_faults() {
        let outbox = Arc::new(Outbox::default());
        let log = FaultLog::new(Duration::from_secs(60))
            .with_mailer(outbox.clone(), "admin@example.com");

        log.report(&upload_fault());
        log.report(&upload_fault());

        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "admin@example.com");
        assert_eq!(sent[0].subject, "Server fault: upload");
    }

    #[tokio::test]
    async fn test_mail_sent_off_the_reporting_task() {
        struct Slow(Outbox);

        impl Mailer for Slow {
            fn send(&self, mail: &Mail) -> Result<()> {
                std::thread::sleep(Duration::from_millis(100));
                self.0.send(mail)
            }
        }

        let slow = Arc::new(Slow(Outbox::default()));
        let log = FaultLog::new(Duration::from_secs(60)).with_mailer(slow.clone(), "admin@example.com");

        let started = Instant::now();
        assert!(log.report(&upload_fault()));
        assert!(started.elapsed() < Duration::from_millis(100));

        for _ in 0..100 {
            if !slow.0 .0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(slow.0 .0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing(&LoggingConfig::default());
        init_tracing(&LoggingConfig {
            json: true,
            ..LoggingConfig::default()
        });
    }
}
