//! Per-instance timing and prompt aggregation
//!
//! The [`Aggregator`] walks the event stream once, in order, keeping a small
//! rolling state (open resume, open pause, open prompt screen, last event and
//! last value per xpath) and accumulating an [`InstanceMetrics`] record.
//! Anomalies are recorded as diagnostics; none of them stops aggregation.

use crate::config::Thresholds;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::event::{Event, Stage};
use crate::schema::Code;
use crate::types::InstanceMetrics;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Rolling state carried between events
#[derive(Debug, Default)]
struct AggregatorState {
    open_resume: Option<Rc<Event>>,
    open_pause: Option<Rc<Event>>,
    /// Resume or enter-prompt event still waiting for its leave
    open_question_enter: Option<Rc<Event>>,
    last_seen: Option<Rc<Event>>,
    /// Last value observed per xpath
    prompt_last_value: HashMap<String, String>,
}

/// Single-pass metrics accumulator for one instance
#[derive(Debug)]
pub struct Aggregator {
    thresholds: Thresholds,
    tracked: HashSet<String>,
    state: AggregatorState,
    metrics: InstanceMetrics,
    diagnostics: Diagnostics,
}

impl Aggregator {
    /// Create an aggregator reporting on the given prompt names
    pub fn new(thresholds: Thresholds, prompts: &[String]) -> Self {
        Self {
            thresholds,
            tracked: prompts.iter().cloned().collect(),
            state: AggregatorState::default(),
            metrics: InstanceMetrics::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Aggregate a whole event stream
    pub fn aggregate(
        thresholds: Thresholds,
        prompts: &[String],
        events: impl IntoIterator<Item = Event>,
    ) -> (InstanceMetrics, Vec<Diagnostic>) {
        let mut aggregator = Aggregator::new(thresholds, prompts);
        for event in events {
            aggregator.consume(event);
        }
        aggregator.finish()
    }

    /// Process the next event
    pub fn consume(&mut self, event: Event) {
        let event = Rc::new(event);

        self.check_order(&event);
        if event.stage() == Stage::Error {
            self.diagnostics.warn(Diagnostic::UnknownStage {
                event: event.to_string(),
            });
        }
        self.track_resume_pause(&event);
        self.track_question_time(&event);
        self.track_countables(&event);
        self.track_values(&event);

        self.state.last_seen = Some(event);
    }

    /// Metrics so far; sessions still open are left unresolved
    pub fn finish(self) -> (InstanceMetrics, Vec<Diagnostic>) {
        (self.metrics, self.diagnostics.into_vec())
    }

    fn is_tracked(&self, prompt: &str) -> bool {
        self.tracked.contains(prompt)
    }

    fn check_order(&mut self, event: &Event) {
        if self.state.open_resume.is_none() {
            return;
        }
        if let Some(previous) = &self.state.last_seen {
            if previous.follows(event) {
                self.diagnostics.warn(Diagnostic::OutOfOrder {
                    previous: previous.to_string(),
                    current: event.to_string(),
                });
            }
        }
    }

    fn track_resume_pause(&mut self, event: &Rc<Event>) {
        match event.code() {
            Code::Resume => {
                if let Some(resume) = &self.state.open_resume {
                    self.diagnostics.warn(Diagnostic::ConsecutiveResume {
                        first: resume.to_string(),
                        second: event.to_string(),
                    });
                } else if let Some(pause) = self.state.open_pause.take() {
                    self.track_short_break(&pause, event);
                    let paused = event.gap_since(&pause);
                    if paused > 0 {
                        self.metrics.paused_ms += paused;
                    }
                    if 0 < paused && paused < self.thresholds.short_break_ms {
                        self.metrics.short_break_ms += paused;
                    }
                    self.state.open_resume = Some(Rc::clone(event));
                } else {
                    self.state.open_resume = Some(Rc::clone(event));
                }
            }
            Code::Pause => {
                if let Some(resume) = self.state.open_resume.take() {
                    let resumed = event.gap_since(&resume);
                    if resumed > 0 {
                        self.metrics.resumed_ms += resumed;
                    }
                    if resumed > self.thresholds.large_resume_ms {
                        self.diagnostics.warn(Diagnostic::LargeResumedTime {
                            from: resume.to_string(),
                            to: event.to_string(),
                            resumed_ms: resumed,
                        });
                    }
                    self.state.open_pause = Some(Rc::clone(event));
                } else if let Some(pause) = &self.state.open_pause {
                    self.diagnostics.warn(Diagnostic::ConsecutivePause {
                        first: pause.to_string(),
                        second: event.to_string(),
                    });
                } else {
                    self.diagnostics.warn(Diagnostic::PauseBeforeResume {
                        event: event.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    /// Attribute a short pause to the prompts shown on both sides of it
    fn track_short_break(&mut self, pause: &Event, resume: &Event) {
        if pause.stage() != Stage::Question || resume.stage() != Stage::Question {
            return;
        }
        let diff = resume.gap_since(pause);
        if !(0 < diff && diff < self.thresholds.short_break_ms) {
            return;
        }
        let resume_prompts = resume.prompt_set();
        for prompt in pause.prompt_set().intersection(&resume_prompts) {
            if self.is_tracked(prompt) {
                self.metrics.prompt_mut(prompt).add_short_break(diff);
            }
        }
    }

    fn track_question_time(&mut self, event: &Rc<Event>) {
        if event.stage() != Stage::Question {
            return;
        }
        match event.code() {
            Code::Resume | Code::EnterPrompt => {
                self.state.open_question_enter = Some(Rc::clone(event));
            }
            Code::Pause | Code::LeavePrompt => {
                if let Some(enter) = self.state.open_question_enter.take() {
                    self.track_screen_time(&enter, event);
                }
            }
            _ => {}
        }
    }

    fn track_screen_time(&mut self, enter: &Event, leave: &Event) {
        let time = leave.gap_since(enter);
        let leave_prompts = leave.prompt_set();
        let common: Vec<&str> = enter
            .prompt_set()
            .intersection(&leave_prompts)
            .copied()
            .collect();

        if common.is_empty() {
            self.diagnostics.warn(Diagnostic::UnmatchedEnterExit {
                enter: enter.to_string(),
                leave: leave.to_string(),
            });
        }
        for prompt in common {
            if self.is_tracked(prompt) {
                self.metrics.prompt_mut(prompt).add_resumed(time);
            }
        }
    }

    fn track_countables(&mut self, event: &Event) {
        let question = event.stage() == Stage::Question;
        match event.code() {
            Code::EnterPrompt if question => {
                self.metrics.enter_count += 1;
                for prompt in event.prompts() {
                    if self.is_tracked(prompt) {
                        self.metrics.prompt_mut(prompt).count_visit();
                    } else {
                        self.metrics.uncaptured_prompts.insert(prompt.to_string());
                    }
                }
            }
            Code::ConstraintContravened if question => {
                for prompt in event.prompts() {
                    if self.is_tracked(prompt) {
                        self.metrics.prompt_mut(prompt).count_contravened_constraint();
                    }
                }
            }
            Code::SaveForm => self.metrics.save_count += 1,
            Code::RelationSelfDestruct => self.metrics.relation_self_destruct_count += 1,
            _ => {}
        }
    }

    /// Count value changes per prompt, for every row regardless of code
    fn track_values(&mut self, event: &Event) {
        for (row, prompt) in event.rows().iter().zip(event.prompts()) {
            let changed = match self.state.prompt_last_value.entry(row.xpath.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(row.value.clone());
                    !row.value.is_empty()
                }
                Entry::Occupied(mut entry) => {
                    if *entry.get() != row.value {
                        entry.insert(row.value.clone());
                        true
                    } else {
                        false
                    }
                }
            };
            if changed && self.tracked.contains(prompt) {
                self.metrics.prompt_mut(prompt).count_value_change();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogRow;
    use pretty_assertions::assert_eq;

    fn event(rows: &[(i64, &str, &str, &str)]) -> Event {
        Event::from_rows(
            rows.iter()
                .map(|(t, code, xpath, value)| LogRow::new(1, *t, *code, *xpath, *value)),
        )
        .unwrap()
    }

    fn tracked(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn run(prompts: &[&str], events: Vec<Event>) -> (InstanceMetrics, Vec<Diagnostic>) {
        Aggregator::aggregate(Thresholds::default(), &tracked(prompts), events)
    }

    #[test]
    fn test_enter_leave_screen_time() {
        let (metrics, diagnostics) = run(
            &["age"],
            vec![
                event(&[(1000, "EP", "/data/age[1]", "")]),
                event(&[(5000, "LP", "/data/age[1]", "")]),
            ],
        );

        let age = metrics.prompt("age").unwrap();
        assert_eq!(age.resumed_ms, Some(4000));
        assert_eq!(age.visit_count, Some(1));
        assert_eq!(metrics.enter_count, 1);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_value_changes() {
        let (metrics, _) = run(
            &["age"],
            vec![
                event(&[(1000, "EP", "/data/age[1]", "")]),
                event(&[(2000, "LP", "/data/age[1]", "A")]),
                event(&[(3000, "EP", "/data/age[1]", "A")]),
                event(&[(4000, "LP", "/data/age[1]", "B")]),
            ],
        );

        assert_eq!(metrics.prompt("age").unwrap().value_change_count, Some(2));
    }

    #[test]
    fn test_first_non_empty_value_counts_as_change() {
        let (metrics, _) = run(&["name"], vec![event(&[(1000, "LP", "/data/name[1]", "Ana")])]);
        assert_eq!(metrics.prompt("name").unwrap().value_change_count, Some(1));
    }

    #[test]
    fn test_resume_pause_totals() {
        let (metrics, diagnostics) = run(
            &[],
            vec![
                event(&[(0, "oR", "null", "")]),
                event(&[(60_000, "oP", "null", "")]),
                event(&[(960_000, "oR", "null", "")]),
                event(&[(1_000_000, "oP", "null", "")]),
                event(&[(4_000_000, "oR", "null", "")]),
            ],
        );

        assert_eq!(metrics.resumed_ms, 60_000 + 40_000);
        assert_eq!(metrics.paused_ms, 900_000 + 3_000_000);
        assert_eq!(metrics.short_break_ms, 900_000);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_resumed_time_measured_between_event_edges() {
        let (metrics, _) = run(
            &[],
            vec![
                event(&[(0, "oR", "null", ""), (100, "oR", "null", "")]),
                event(&[(1000, "oP", "null", ""), (1100, "oP", "null", "")]),
            ],
        );

        assert_eq!(metrics.resumed_ms, 900);
    }

    #[test]
    fn test_short_break_per_prompt() {
        let sessions = |pause_ms: i64| {
            vec![
                event(&[(0, "oR", "/data/age[1]", "")]),
                event(&[(1000, "oP", "/data/age[1]", "")]),
                event(&[(1000 + pause_ms, "oR", "/data/age[1]", "")]),
            ]
        };

        let (metrics, _) = run(&["age"], sessions(900_000));
        assert_eq!(metrics.prompt("age").unwrap().short_break_ms, Some(900_000));
        assert_eq!(metrics.short_break_ms, 900_000);

        let (metrics, _) = run(&["age"], sessions(2_000_000));
        assert_eq!(metrics.prompt("age").unwrap().short_break_ms, None);
        assert_eq!(metrics.short_break_ms, 0);
        assert_eq!(metrics.paused_ms, 2_000_000);
    }

    #[test]
    fn test_resume_screen_time_attributed_to_prompt() {
        let (metrics, _) = run(
            &["age"],
            vec![
                event(&[(0, "oR", "/data/age[1]", "")]),
                event(&[(2500, "oP", "/data/age[1]", "")]),
            ],
        );
        assert_eq!(metrics.prompt("age").unwrap().resumed_ms, Some(2500));
        assert_eq!(metrics.resumed_ms, 2500);
    }

    #[test]
    fn test_unmatched_enter_exit() {
        let (metrics, diagnostics) = run(
            &["age", "name"],
            vec![
                event(&[(1000, "EP", "/data/age[1]", "")]),
                event(&[(2000, "LP", "/data/name[1]", "")]),
            ],
        );
        assert_eq!(metrics.prompt("age").unwrap().resumed_ms, None);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind(), "unmatched_enter_exit");
    }

    #[test]
    fn test_pause_anomalies() {
        let (_, diagnostics) = run(
            &[],
            vec![
                event(&[(0, "oP", "null", "")]),
                event(&[(10, "oR", "null", "")]),
                event(&[(20, "oP", "null", "")]),
                event(&[(30, "oP", "null", "")]),
            ],
        );
        let kinds: Vec<&str> = diagnostics.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["pause_before_resume", "consecutive_pause"]);
    }

    #[test]
    fn test_consecutive_resume_is_reported() {
        let (metrics, diagnostics) = run(
            &[],
            vec![event(&[(0, "oR", "null", "")]), event(&[(10, "oR", "null", "")])],
        );
        assert_eq!(diagnostics[0].kind(), "consecutive_resume");
        assert_eq!(metrics.resumed_ms, 0);
    }

    #[test]
    fn test_large_resumed_time() {
        let (metrics, diagnostics) = run(
            &[],
            vec![
                event(&[(0, "oR", "null", "")]),
                event(&[(7_200_001, "oP", "null", "")]),
            ],
        );
        assert_eq!(metrics.resumed_ms, 7_200_001);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::LargeResumedTime {
                resumed_ms: 7_200_001,
                ..
            }
        ));
    }

    #[test]
    fn test_countables() {
        let (metrics, _) = run(
            &["age"],
            vec![
                event(&[(0, "oR", "null", "")]),
                event(&[(100, "EP", "/data/age[1]", ""), (110, "EP", "/data/note[1]", "")]),
                event(&[(200, "CC", "/data/age[1]", ""), (210, "CC", "/data/note[1]", "")]),
                event(&[(300, "SF", "null", "")]),
                event(&[(400, "rS", "/data/roster[1]", "")]),
                event(&[(500, "CC", "null", "")]),
            ],
        );

        let age = metrics.prompt("age").unwrap();
        assert_eq!(age.visit_count, Some(1));
        assert_eq!(age.contravened_constraint_count, Some(1));
        assert_eq!(metrics.enter_count, 1);
        assert_eq!(metrics.save_count, 1);
        assert_eq!(metrics.relation_self_destruct_count, 1);
        assert_eq!(
            metrics.uncaptured_prompts.iter().collect::<Vec<_>>(),
            vec!["note"]
        );
        assert!(metrics.prompt("note").is_none());
    }

    #[test]
    fn test_untracked_prompts_never_keyed() {
        let (metrics, _) = run(
            &[],
            vec![
                event(&[(100, "EP", "/data/age[1]", "1")]),
                event(&[(200, "LP", "/data/age[1]", "2")]),
            ],
        );
        assert!(metrics.prompts.is_empty());
        assert!(metrics.uncaptured_prompts.contains("age"));
    }

    #[test]
    fn test_error_stage_is_diagnostic_only() {
        let (metrics, diagnostics) = run(
            &["age"],
            vec![event(&[(100, "EP", "uC", ""), (110, "EP", "/data/age[1]", "5")])],
        );
        assert_eq!(diagnostics[0].kind(), "unknown_stage");
        assert_eq!(metrics.enter_count, 0);
        assert_eq!(metrics.prompt("age").unwrap().value_change_count, Some(1));
    }

    #[test]
    fn test_out_of_order_while_resumed() {
        let (_, diagnostics) = run(
            &[],
            vec![
                event(&[(1000, "oR", "null", "")]),
                event(&[(5000, "EP", "/data/age[1]", "")]),
                event(&[(2000, "LP", "/data/age[1]", "")]),
            ],
        );
        assert!(diagnostics.iter().any(|d| d.kind() == "out_of_order"));
    }

    #[test]
    fn test_open_session_left_unresolved() {
        let (metrics, diagnostics) = run(
            &[],
            vec![
                event(&[(0, "oR", "null", "")]),
                event(&[(500, "EP", "/data/age[1]", "")]),
            ],
        );
        assert_eq!(metrics.resumed_ms, 0);
        assert!(diagnostics.is_empty());
    }
}
