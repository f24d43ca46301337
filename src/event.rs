use crossterm::event::{Event as CrosstermEvent, EventStream, KeyEvent, KeyEventKind, MouseEvent};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

/// Bounded event queue; ticks are dropped rather than queued when full.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Terminal input, normalized for the dashboard loop.
#[derive(Debug)]
pub enum Event {
    /// Key presses and repeats. Releases are filtered out.
    Key(KeyEvent),
    Mouse(MouseEvent),
    /// Bracketed paste; arrives as one event instead of a key storm.
    Paste(String),
    Resize(u16, u16),
    Tick,
}

impl Event {
    fn from_crossterm(event: CrosstermEvent) -> Option<Self> {
        match event {
            CrosstermEvent::Key(key) if key.kind != KeyEventKind::Release => Some(Event::Key(key)),
            CrosstermEvent::Mouse(mouse) => Some(Event::Mouse(mouse)),
            CrosstermEvent::Paste(text) => Some(Event::Paste(text)),
            CrosstermEvent::Resize(w, h) => Some(Event::Resize(w, h)),
            _ => None,
        }
    }
}

pub struct EventHandler {
    rx: mpsc::Receiver<Event>,
    _task: tokio::task::JoinHandle<()>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> Self {
        Self::from_stream(EventStream::new(), tick_rate)
    }

    /// Build from any crossterm-compatible stream so tests can inject input.
    pub fn from_stream<S>(mut stream: S, tick_rate: Duration) -> Self
    where
        S: Stream<Item = Result<CrosstermEvent, std::io::Error>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + tick_rate;
            let mut tick = tokio::time::interval_at(start, tick_rate);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => match tx.try_send(Event::Tick) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    next = stream.next() => match next {
                        Some(Ok(raw)) => {
                            if let Some(event) = Event::from_crossterm(raw) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "terminal input stream failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Self { rx, _task: task }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
