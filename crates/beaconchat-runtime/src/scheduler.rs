//! Transmit scheduler
//!
//! Decides which fragment should be on the air and when. The scheduler never
//! sleeps or spawns; it hands out [`SequenceStep`]s and a deadline, and the
//! coordinator loop waits for that deadline alongside everything else it
//! listens to. Cancelling is dropping the active sequence, which leaves no
//! timer behind.
//!
//! For a message of `n > 1` fragments the schedule is fragment `i` at
//! `i * delay`, then the last fragment once more at `n * delay`, after which
//! the sequence is complete. A single fragment is sent once and completes
//! immediately.
//!
//! A cycle (used for presence) never completes: after the last fragment it
//! starts over from the first, so a receiver that tunes in late still hears
//! every part.

use core::fmt;
use core::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Identifier of one transmit sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(u64);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq-{}", self.0)
    }
}

/// Where a step sits in its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// The only fragment of a one-fragment message
    Single,
    /// First fragment of a multi-fragment message
    First,
    /// A later fragment
    Next,
    /// Repeat of the last fragment for late listeners
    FinalRepeat,
    /// First fragment again, in a cycle
    Restart,
}

/// A payload that should go on the air now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    pub sequence: SequenceId,
    pub kind: StepKind,
    /// Fragment index within the sequence
    pub index: usize,
    pub payload: Vec<u8>,
    /// Whether the sequence is finished once this step is broadcast
    pub completes: bool,
}

/// Result of starting a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSequence {
    pub sequence: SequenceId,
    /// Sequence that was in flight and has been dropped
    pub superseded: Option<SequenceId>,
    /// Step to broadcast immediately
    pub first: SequenceStep,
}

#[derive(Debug)]
struct ActiveSequence {
    id: SequenceId,
    fragments: Vec<Vec<u8>>,
    next_index: usize,
    delay: Duration,
    deadline: Instant,
    cycling: bool,
}

/// Single-flight fragment scheduler
#[derive(Debug, Default)]
pub struct TransmitScheduler {
    active: Option<ActiveSequence>,
    next_id: u64,
}

impl TransmitScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast one payload, superseding any sequence in flight
    pub fn send_once(&mut self, payload: Vec<u8>, now: Instant) -> StartedSequence {
        self.start(vec![payload], Duration::ZERO, now)
    }

    /// Start sending `fragments`, superseding any sequence in flight
    ///
    /// An empty fragment list is treated as one empty payload.
    pub fn start(
        &mut self,
        fragments: Vec<Vec<u8>>,
        delay: Duration,
        now: Instant,
    ) -> StartedSequence {
        self.begin(fragments, delay, now, false)
    }

    /// Keep cycling through `fragments` until superseded or cancelled
    ///
    /// A single fragment is broadcast once and left on the air.
    pub fn start_cycle(
        &mut self,
        fragments: Vec<Vec<u8>>,
        delay: Duration,
        now: Instant,
    ) -> StartedSequence {
        self.begin(fragments, delay, now, true)
    }

    fn begin(
        &mut self,
        mut fragments: Vec<Vec<u8>>,
        delay: Duration,
        now: Instant,
        cycling: bool,
    ) -> StartedSequence {
        let superseded = self.cancel();
        let sequence = self.allocate_id();

        if fragments.len() <= 1 {
            let payload = fragments.pop().unwrap_or_default();
            trace!("{}: single fragment", sequence);
            return StartedSequence {
                sequence,
                superseded,
                first: SequenceStep {
                    sequence,
                    kind: StepKind::Single,
                    index: 0,
                    payload,
                    completes: !cycling,
                },
            };
        }

        let first = SequenceStep {
            sequence,
            kind: StepKind::First,
            index: 0,
            payload: fragments[0].clone(),
            completes: false,
        };
        trace!("{}: {} fragments, {:?} apart", sequence, fragments.len(), delay);

        self.active = Some(ActiveSequence {
            id: sequence,
            fragments,
            next_index: 1,
            delay,
            deadline: now + delay,
            cycling,
        });

        StartedSequence {
            sequence,
            superseded,
            first,
        }
    }

    /// Produce the step that is due at `now`, if any
    pub fn poll(&mut self, now: Instant) -> Option<SequenceStep> {
        let active = self.active.as_mut()?;
        if now < active.deadline {
            return None;
        }

        let total = active.fragments.len();
        let mut kind = StepKind::Next;
        if active.cycling && active.next_index >= total {
            active.next_index = 0;
            kind = StepKind::Restart;
        }
        if active.next_index < total {
            let index = active.next_index;
            active.next_index += 1;
            active.deadline += active.delay;
            return Some(SequenceStep {
                sequence: active.id,
                kind,
                index,
                payload: active.fragments[index].clone(),
                completes: false,
            });
        }

        let finished = self.active.take()?;
        let index = total - 1;
        let payload = finished.fragments.into_iter().nth(index)?;
        Some(SequenceStep {
            sequence: finished.id,
            kind: StepKind::FinalRepeat,
            index,
            payload,
            completes: true,
        })
    }

    /// When the next step becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|active| active.deadline)
    }

    /// Drop the sequence in flight
    pub fn cancel(&mut self) -> Option<SequenceId> {
        self.active.take().map(|active| {
            trace!("{}: cancelled at fragment {}", active.id, active.next_index);
            active.id
        })
    }

    /// Sequence currently in flight
    pub fn active_sequence(&self) -> Option<SequenceId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Fragments sent so far and total for the sequence in flight
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.active
            .as_ref()
            .map(|active| (active.next_index, active.fragments.len()))
    }

    fn allocate_id(&mut self) -> SequenceId {
        self.next_id += 1;
        SequenceId(self.next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DELAY: Duration = Duration::from_millis(900);

    fn payloads(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8]).collect()
    }

    /// Poll at each deadline until the sequence completes
    fn drain(scheduler: &mut TransmitScheduler, start: Instant) -> Vec<(Duration, SequenceStep)> {
        let mut steps = Vec::new();
        while let Some(deadline) = scheduler.next_deadline() {
            assert!(scheduler.poll(deadline - Duration::from_millis(1)).is_none());
            let step = scheduler.poll(deadline).unwrap();
            steps.push((deadline - start, step));
        }
        steps
    }

    #[test]
    fn test_single_fragment_completes_immediately() {
        let mut scheduler = TransmitScheduler::new();
        let started = scheduler.start(payloads(1), DELAY, Instant::now());
        assert_eq!(started.first.kind, StepKind::Single);
        assert!(started.first.completes);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_three_fragment_schedule() {
        let mut scheduler = TransmitScheduler::new();
        let start = Instant::now();
        let started = scheduler.start(payloads(3), DELAY, start);
        assert_eq!(started.first.kind, StepKind::First);
        assert_eq!(started.first.payload, vec![0]);

        let steps = drain(&mut scheduler, start);
        let summary: Vec<(u128, StepKind, Vec<u8>, bool)> = steps
            .into_iter()
            .map(|(at, s)| (at.as_millis(), s.kind, s.payload, s.completes))
            .collect();
        assert_eq!(
            summary,
            vec![
                (900, StepKind::Next, vec![1], false),
                (1800, StepKind::Next, vec![2], false),
                (2700, StepKind::FinalRepeat, vec![2], true),
            ]
        );
        assert_eq!(scheduler.active_sequence(), None);
    }

    #[test]
    fn test_new_sequence_supersedes() {
        let mut scheduler = TransmitScheduler::new();
        let now = Instant::now();
        let first = scheduler.start(payloads(3), DELAY, now);
        let second = scheduler.start(payloads(2), DELAY, now);
        assert_eq!(second.superseded, Some(first.sequence));
        assert_ne!(first.sequence, second.sequence);

        let steps = drain(&mut scheduler, now);
        assert!(steps.iter().all(|(_, s)| s.sequence == second.sequence));
    }

    #[test]
    fn test_send_once_cancels_sequence() {
        let mut scheduler = TransmitScheduler::new();
        let now = Instant::now();
        let seq = scheduler.start(payloads(4), DELAY, now);
        let ping = scheduler.send_once(b"ping".to_vec(), now);
        assert_eq!(ping.superseded, Some(seq.sequence));
        assert!(scheduler.poll(now + DELAY * 10).is_none());
    }

    #[test]
    fn test_cycle_restarts_and_never_completes() {
        let mut scheduler = TransmitScheduler::new();
        let now = Instant::now();
        let started = scheduler.start_cycle(payloads(2), DELAY, now);
        assert!(!started.first.completes);

        let steps: Vec<(StepKind, Vec<u8>)> = (1..=4)
            .map(|i| scheduler.poll(now + DELAY * i).unwrap())
            .map(|s| {
                assert!(!s.completes);
                (s.kind, s.payload)
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                (StepKind::Next, vec![1]),
                (StepKind::Restart, vec![0]),
                (StepKind::Next, vec![1]),
                (StepKind::Restart, vec![0]),
            ]
        );
        assert!(scheduler.active_sequence().is_some());
    }

    #[test]
    fn test_single_fragment_cycle_is_held() {
        let mut scheduler = TransmitScheduler::new();
        let started = scheduler.start_cycle(payloads(1), DELAY, Instant::now());
        assert_eq!(started.first.kind, StepKind::Single);
        assert!(!started.first.completes);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut scheduler = TransmitScheduler::new();
        let now = Instant::now();
        let seq = scheduler.start(payloads(2), DELAY, now);
        assert_eq!(scheduler.cancel(), Some(seq.sequence));
        assert_eq!(scheduler.cancel(), None);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_late_poll_catches_up_one_step_at_a_time() {
        let mut scheduler = TransmitScheduler::new();
        let now = Instant::now();
        scheduler.start(payloads(3), DELAY, now);

        let late = now + Duration::from_secs(10);
        let kinds: Vec<StepKind> = std::iter::from_fn(|| scheduler.poll(late))
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds, vec![StepKind::Next, StepKind::Next, StepKind::FinalRepeat]);
    }

    proptest! {
        /// Property: n > 1 fragments produce n + 1 broadcasts ending in one completion
        #[test]
        fn sequence_has_one_repeat(n in 2usize..40) {
            let mut scheduler = TransmitScheduler::new();
            let start = Instant::now();
            let started = scheduler.start(payloads(n), DELAY, start);
            let steps = drain(&mut scheduler, start);

            prop_assert_eq!(steps.len(), n);
            prop_assert!(!started.first.completes);
            prop_assert_eq!(steps.iter().filter(|(_, s)| s.completes).count(), 1);
            let (at, last) = &steps[steps.len() - 1];
            prop_assert_eq!(*at, DELAY * n as u32);
            prop_assert_eq!(&last.payload, &vec![(n - 1) as u8]);
        }
    }
}
