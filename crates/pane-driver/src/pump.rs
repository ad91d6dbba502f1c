//! Signal plumbing between event delivery and a window's draw loop.
//!
//! [`DrawPump`] carries the three coalescing, non-blocking signals a window
//! needs (draw requested, draw done, frame published) plus a stop signal.
//! [`EventPump`] is the unbounded per-window queue the application reads
//! events from.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, select, unbounded};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Observable state of a window's draw loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Waiting for a draw request
    Idle,
    /// A request is pending and the loop has not picked it up yet
    DrawRequested,
    /// The painter is running
    Drawing,
    /// The loop has exited
    Stopped,
}

impl PumpState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PumpState::Idle,
            1 => PumpState::DrawRequested,
            2 => PumpState::Drawing,
            _ => PumpState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PumpState::Idle => 0,
            PumpState::DrawRequested => 1,
            PumpState::Drawing => 2,
            PumpState::Stopped => 3,
        }
    }
}

/// What woke the draw loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Draw,
    Publish,
    Stop,
}

/// Capacity-one signal channel. Sends never block; a send while a signal
/// is already pending is absorbed by it.
struct Slot {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Returns false when the signal coalesced with a pending one.
    fn raise(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }

    fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Draw-loop signals for one window.
pub struct DrawPump {
    draw: Slot,
    done: Slot,
    publish: Slot,
    stop: Slot,
    state: AtomicU8,
    frames_drawn: AtomicU64,
    frames_presented: AtomicU64,
}

impl DrawPump {
    pub fn new() -> Self {
        Self {
            draw: Slot::new(),
            done: Slot::new(),
            publish: Slot::new(),
            stop: Slot::new(),
            state: AtomicU8::new(PumpState::Idle.as_u8()),
            frames_drawn: AtomicU64::new(0),
            frames_presented: AtomicU64::new(0),
        }
    }

    /// Ask the draw loop for a frame.
    ///
    /// Never blocks. Returns false when a request was already pending, in
    /// which case the two requests produce a single draw.
    pub fn request_draw(&self) -> bool {
        if self.state() == PumpState::Stopped {
            return false;
        }
        let raised = self.draw.raise();
        if raised {
            let _ = self.state.compare_exchange(
                PumpState::Idle.as_u8(),
                PumpState::DrawRequested.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        raised
    }

    /// Signal that a finished frame is ready to present.
    ///
    /// Never blocks. Publishing twice before the loop consumes the first
    /// signal presents once.
    pub fn publish(&self) -> bool {
        if self.state() == PumpState::Stopped {
            return false;
        }
        self.publish.raise()
    }

    /// Consume a pending publish signal, if any.
    pub fn take_publish(&self) -> bool {
        self.publish.take()
    }

    /// Wait for a frame drawn after this call.
    pub fn wait_drawn(&self, timeout: Duration) -> bool {
        self.wait_drawn_since(self.frames_drawn(), timeout)
    }

    /// Wait until more than `seen` frames have been drawn.
    ///
    /// Sample [`DrawPump::frames_drawn`] before requesting a draw and pass it
    /// here; a draw finishing in between is not missed.
    pub fn wait_drawn_since(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.frames_drawn() > seen {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // The counter moves before the signal is raised, so a stale
            // signal only costs one more check.
            let _ = self.done.rx.recv_timeout(deadline - now);
        }
    }

    /// Ask the draw loop to exit.
    pub fn stop(&self) {
        self.stop.raise();
    }

    pub fn state(&self) -> PumpState {
        PumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Acquire)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Acquire)
    }

    /// Block until the next signal. Stop wins over pending work.
    pub(crate) fn next_signal(&self) -> Signal {
        if self.stop.is_pending() {
            return Signal::Stop;
        }
        select! {
            recv(self.stop.rx) -> _ => Signal::Stop,
            recv(self.draw.rx) -> _ => Signal::Draw,
            recv(self.publish.rx) -> _ => Signal::Publish,
        }
    }

    pub(crate) fn begin_draw(&self) {
        self.state.store(PumpState::Drawing.as_u8(), Ordering::Release);
    }

    /// Record the end of a draw. Successful draws count as drawn frames.
    pub(crate) fn finish_draw(&self, drawn: bool) {
        if drawn {
            self.frames_drawn.fetch_add(1, Ordering::AcqRel);
        }
        let next = if self.draw.is_pending() {
            PumpState::DrawRequested
        } else {
            PumpState::Idle
        };
        let _ = self.state.compare_exchange(
            PumpState::Drawing.as_u8(),
            next.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.done.raise();
    }

    pub(crate) fn presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(PumpState::Stopped.as_u8(), Ordering::Release);
    }
}

impl Default for DrawPump {
    fn default() -> Self {
        Self::new()
    }
}

/// Unbounded event queue with an explicit end.
///
/// After [`EventPump::release`], queued events can still be read; once they
/// are drained the receive calls return `None`.
pub struct EventPump<E> {
    tx: Mutex<Option<Sender<E>>>,
    rx: Receiver<E>,
}

impl<E> EventPump<E> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Queue an event. Returns false once the pump is released.
    pub fn send(&self, event: E) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Block for the next event.
    pub fn next_event(&self) -> Option<E> {
        self.rx.recv().ok()
    }

    pub fn next_event_timeout(&self, timeout: Duration) -> Option<E> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_next_event(&self) -> Option<E> {
        match self.rx.try_recv() {
            Ok(e) => Some(e),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Close the queue for writers.
    pub fn release(&self) {
        self.tx.lock().take();
    }

    pub fn is_released(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl<E> Default for EventPump<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_draw_requests_coalesce() {
        let pump = DrawPump::new();

        assert!(pump.request_draw());
        assert!(!pump.request_draw());
        assert!(!pump.request_draw());
        assert_eq!(pump.state(), PumpState::DrawRequested);

        assert_eq!(pump.next_signal(), Signal::Draw);
        assert!(!pump.draw.is_pending());
    }

    #[test]
    fn test_two_publishes_yield_one_signal() {
        let pump = DrawPump::new();

        assert!(pump.publish());
        assert!(!pump.publish());

        assert!(pump.take_publish());
        assert!(!pump.take_publish());
    }

    #[test]
    fn test_stop_wins_over_pending_work() {
        let pump = DrawPump::new();
        pump.request_draw();
        pump.publish();
        pump.stop();

        assert_eq!(pump.next_signal(), Signal::Stop);
    }

    #[test]
    fn test_draw_cycle_updates_state_and_counters() {
        let pump = DrawPump::new();
        pump.request_draw();
        assert_eq!(pump.next_signal(), Signal::Draw);

        pump.begin_draw();
        assert_eq!(pump.state(), PumpState::Drawing);
        // A request raised mid-draw stays pending for the next round
        assert!(pump.request_draw());
        assert_eq!(pump.state(), PumpState::Drawing);

        pump.finish_draw(true);
        assert_eq!(pump.state(), PumpState::DrawRequested);
        assert_eq!(pump.frames_drawn(), 1);
        assert!(pump.wait_drawn_since(0, Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_drawn_ignores_earlier_frames() {
        let pump = DrawPump::new();
        pump.begin_draw();
        pump.finish_draw(true);

        // The done signal of that frame is still pending
        assert!(!pump.wait_drawn(Duration::from_millis(20)));
        assert!(!pump.wait_drawn_since(1, Duration::from_millis(20)));
        assert!(pump.wait_drawn_since(0, Duration::ZERO));
    }

    #[test]
    fn test_wait_drawn_wakes_on_new_frame() {
        let pump = Arc::new(DrawPump::new());
        pump.begin_draw();
        pump.finish_draw(true);

        let waiter = {
            let pump = pump.clone();
            thread::spawn(move || pump.wait_drawn_since(1, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        pump.begin_draw();
        pump.finish_draw(true);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_failed_draw_does_not_satisfy_wait() {
        let pump = DrawPump::new();
        pump.begin_draw();
        pump.finish_draw(false);

        assert!(!pump.wait_drawn_since(0, Duration::from_millis(20)));
    }

    #[test]
    fn test_failed_draw_is_not_counted() {
        let pump = DrawPump::new();
        pump.begin_draw();
        pump.finish_draw(false);

        assert_eq!(pump.frames_drawn(), 0);
        assert_eq!(pump.state(), PumpState::Idle);
    }

    #[test]
    fn test_stopped_pump_ignores_requests() {
        let pump = DrawPump::new();
        pump.mark_stopped();

        assert!(!pump.request_draw());
        assert!(!pump.publish());
        assert_eq!(pump.state(), PumpState::Stopped);
    }

    #[test]
    fn test_request_wakes_waiting_loop() {
        let pump = Arc::new(DrawPump::new());
        let waiter = {
            let pump = pump.clone();
            thread::spawn(move || pump.next_signal())
        };

        thread::sleep(Duration::from_millis(20));
        pump.request_draw();
        assert_eq!(waiter.join().unwrap(), Signal::Draw);
    }

    #[test]
    fn test_event_pump_drains_after_release() {
        let events = EventPump::new();
        assert!(events.send(1));
        assert!(events.send(2));
        events.release();

        assert!(!events.send(3));
        assert!(events.is_released());
        assert_eq!(events.next_event(), Some(1));
        assert_eq!(events.try_next_event(), Some(2));
        assert_eq!(events.next_event(), None);
    }

    #[test]
    fn test_event_pump_timeout() {
        let events: EventPump<u32> = EventPump::new();
        assert_eq!(events.next_event_timeout(Duration::from_millis(5)), None);
        assert_eq!(events.pending(), 0);
    }
}
