//! Event segmentation
//!
//! Turns the ordered stream of validated rows into an ordered stream of
//! [`Event`]s. A run of rows is closed when the code changes or when a row
//! arrives more than a threshold after the run started. While closing runs,
//! sessions are kept consistent: a resume (`oR`) that follows another resume
//! with no pause in between gets a synthetic pause (`oP`) inserted in front of
//! it, copied from the last non-relation event.
//!
//! Segmentation is a pure step function, [`advance`], over an explicit
//! [`SegmenterState`]. [`Segmenter`] wraps it for streaming use.

use crate::config::Thresholds;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::event::{Event, Run};
use crate::schema::{Code, LogRow};

/// State carried from one row to the next
#[derive(Debug, Clone, Default)]
pub struct SegmenterState {
    /// Rows not yet closed into an event
    run: Option<Run>,
    /// Start line of the last resume not yet matched by a pause
    open_resume: Option<usize>,
    /// Most recently closed event whose code is not a relation code
    prev_non_relation: Option<Event>,
}

impl SegmenterState {
    /// True when no row has been seen yet
    pub fn is_empty(&self) -> bool {
        self.run.is_none() && self.prev_non_relation.is_none()
    }

    /// Close `run` into an event and apply session repair.
    ///
    /// `resume_next` is true when the row that caused the close is a resume,
    /// and at end of stream.
    fn close(
        &mut self,
        run: Run,
        resume_next: bool,
        next_line: usize,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Event> {
        let event = run.close();

        match event.code() {
            Code::Resume => self.open_resume = Some(event.start_line()),
            Code::Pause => self.open_resume = None,
            _ => {}
        }

        if !event.code().is_relation() {
            if self.prev_non_relation.is_none() && *event.code() != Code::Resume {
                diagnostics.warn(Diagnostic::FirstNotResume {
                    code: event.code().to_string(),
                    line: event.start_line(),
                });
            }
            self.prev_non_relation = Some(event.clone());
        }

        if !event.is_increasing() {
            diagnostics.warn(Diagnostic::NotIncreasing {
                start_line: event.start_line(),
                end_line: event.end_line(),
            });
        }

        let mut events = vec![event];
        if resume_next && self.open_resume.is_some() {
            diagnostics.warn(Diagnostic::ResumeWithoutPause { line: next_line });
            if let Some(previous) = &self.prev_non_relation {
                events.push(previous.pause_after());
            }
            self.open_resume = None;
        }
        events
    }
}

/// Result of feeding one row (or the end of stream) to the segmenter
#[derive(Debug, Clone)]
pub struct Step {
    pub state: SegmenterState,
    /// Events closed by this step, in order
    pub events: Vec<Event>,
    /// Anomalies found by this step (already logged)
    pub diagnostics: Vec<Diagnostic>,
}

/// Feed the next row to the segmenter
pub fn advance(thresholds: &Thresholds, state: SegmenterState, row: LogRow) -> Step {
    let SegmenterState {
        run,
        open_resume,
        prev_non_relation,
    } = state;
    let mut state = SegmenterState {
        run: None,
        open_resume,
        prev_non_relation,
    };

    let Some(mut run) = run else {
        state.run = Some(Run::start(row));
        return Step {
            state,
            events: Vec::new(),
            diagnostics: Vec::new(),
        };
    };

    let code_change = row.code != *run.code();
    let threshold = if run.code().is_relation() {
        thresholds.relation_ms
    } else {
        thresholds.event_ms
    };
    let time_split = row.timestamp - run.start_time() > threshold;

    if !code_change && !time_split {
        run.push(row);
        state.run = Some(run);
        return Step {
            state,
            events: Vec::new(),
            diagnostics: Vec::new(),
        };
    }

    let mut diagnostics = Diagnostics::new();
    if time_split && !code_change && !run.code().is_repeatable() {
        diagnostics.warn(Diagnostic::TimeSplit {
            code: run.code().to_string(),
            line: row.line,
        });
    }

    let events = state.close(run, row.code == Code::Resume, row.line, &mut diagnostics);
    state.run = Some(Run::start(row));

    Step {
        state,
        events,
        diagnostics: diagnostics.into_vec(),
    }
}

/// Close the open run at end of stream.
///
/// The repair check runs as if a resume were about to follow, so a session
/// still open at the end of the log is closed by a synthetic pause.
pub fn finalize(mut state: SegmenterState) -> Step {
    let mut diagnostics = Diagnostics::new();
    let events = match state.run.take() {
        Some(run) => {
            let next_line = run.end_line() + 1;
            state.close(run, true, next_line, &mut diagnostics)
        }
        None => Vec::new(),
    };
    Step {
        state,
        events,
        diagnostics: diagnostics.into_vec(),
    }
}

/// Streaming wrapper around [`advance`] and [`finalize`]
#[derive(Debug, Clone)]
pub struct Segmenter {
    thresholds: Thresholds,
    state: SegmenterState,
    diagnostics: Vec<Diagnostic>,
}

impl Segmenter {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: SegmenterState::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Feed one row, returning the events it closed
    pub fn push(&mut self, row: LogRow) -> Vec<Event> {
        let state = std::mem::take(&mut self.state);
        let step = advance(&self.thresholds, state, row);
        self.state = step.state;
        self.diagnostics.extend(step.diagnostics);
        step.events
    }

    /// Close the stream, returning the final events and every diagnostic
    pub fn finish(mut self) -> (Vec<Event>, Vec<Diagnostic>) {
        let step = finalize(self.state);
        self.diagnostics.extend(step.diagnostics);
        (step.events, self.diagnostics)
    }

    /// Segment a complete row stream
    pub fn segment(
        thresholds: Thresholds,
        rows: impl IntoIterator<Item = LogRow>,
    ) -> (Vec<Event>, Vec<Diagnostic>) {
        let mut segmenter = Segmenter::new(thresholds);
        let mut events = Vec::new();
        for row in rows {
            events.extend(segmenter.push(row));
        }
        let (last, diagnostics) = segmenter.finish();
        events.extend(last);
        (events, diagnostics)
    }
}
