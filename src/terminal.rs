use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
static PANIC_HOOK_INSTALLED: Once = Once::new();

pub fn install_panic_hook_once() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let _ = disable_raw_mode();
            original_hook(panic_info);
        }));
    });
}

/// Fires a cancellation token while a request is outstanding.
///
/// On a terminal this puts stdin in raw mode and watches for ESC or Ctrl+C on
/// a blocking thread. Without one it falls back to the SIGINT handler.
pub struct CancelWatcher {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
    raw_mode: bool,
}

impl CancelWatcher {
    pub fn start(cancel: CancellationToken) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        if std::io::stdin().is_terminal() {
            install_panic_hook_once();
            match enable_raw_mode() {
                Ok(()) => {
                    let flag = Arc::clone(&stop);
                    let task = tokio::task::spawn_blocking(move || watch_keys(&flag, &cancel));
                    return Self {
                        stop,
                        task,
                        raw_mode: true,
                    };
                }
                Err(error) => debug!(%error, "raw mode unavailable, watching SIGINT instead"),
            }
        }

        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        Self {
            stop,
            task,
            raw_mode: false,
        }
    }

    /// Line break to use while the watcher is active.
    pub fn newline(&self) -> &'static str {
        if self.raw_mode {
            "\r\n"
        } else {
            "\n"
        }
    }

    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.raw_mode {
            let _ = self.task.await;
            let _ = disable_raw_mode();
        } else {
            self.task.abort();
        }
    }
}

fn watch_keys(stop: &AtomicBool, cancel: &CancellationToken) {
    while !stop.load(Ordering::SeqCst) {
        match event::poll(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(error) => {
                debug!(%error, "terminal event poll failed");
                return;
            }
        }
        if let Ok(Event::Key(key)) = event::read() {
            if is_cancel_key(&key) {
                debug!("cancel key pressed");
                cancel.cancel();
            }
        }
    }
}

pub fn is_cancel_key(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}
