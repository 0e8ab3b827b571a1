//! Frame-stepped enter/exit transitions.
//!
//! A transition carries its own progress and the epoch of the binding that
//! started it. The pool drops a transition whose epoch no longer matches its
//! token instead of resuming it.

/// Which way a transition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Grow in after an acquire
    Enter,
    /// Shrink out before the token returns to the pool
    Exit,
}

/// Outcome of advancing a transition by one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Running(f32),
    Done(f32),
}

impl Step {
    pub fn value(self) -> f32 {
        match self {
            Self::Running(value) | Self::Done(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    kind: TransitionKind,
    epoch: u64,
    delay: f32,
    duration: f32,
    elapsed: f32,
    from: f32,
    to: f32,
}

impl Transition {
    /// Scale from 0 to 1 after `delay` seconds.
    pub fn enter(epoch: u64, delay: f32, duration: f32) -> Self {
        Self {
            kind: TransitionKind::Enter,
            epoch,
            delay: delay.max(0.0),
            duration: duration.max(0.0),
            elapsed: 0.0,
            from: 0.0,
            to: 1.0,
        }
    }

    /// Scale from `from` down to 0.
    pub fn exit(epoch: u64, from: f32, duration: f32) -> Self {
        Self {
            kind: TransitionKind::Exit,
            epoch,
            delay: 0.0,
            duration: duration.max(0.0),
            elapsed: 0.0,
            from,
            to: 0.0,
        }
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Advance by `dt` seconds.
    pub fn step(&mut self, dt: f32) -> Step {
        self.elapsed += dt.max(0.0);
        let active = self.elapsed - self.delay;
        if active < 0.0 {
            return Step::Running(self.from);
        }
        if self.duration <= 0.0 || active >= self.duration {
            return Step::Done(self.to);
        }
        let t = smoothstep(active / self.duration);
        Step::Running(self.from + (self.to - self.from) * t)
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
