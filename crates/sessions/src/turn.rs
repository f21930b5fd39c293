//! Turn tracking (spec.md §3, §4.5 "Turn tracker").
//!
//! The spec describes a turn tracker as its own component, but its state
//! *is* the session's `current_turn`/`turns` fields (§3) — so rather than a
//! separate actor, turn-tracking is a set of `Session` methods here. They
//! stay synchronous and IO-free; the relay core is the one that turns the
//! returned `TurnEvent`s into socket writes, persistence calls, and
//! assessor invocations.

use chrono::{DateTime, Utc};
use vrelay_protocol::{EndReason, ServerMessage, Speaker};

use vrelay_domain::assessor::AssessmentResult;
use vrelay_domain::ids::TurnId;
use vrelay_domain::persistence::TurnRecord;

use crate::session::{Session, SessionState};

#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: TurnId,
    pub speaker: Speaker,
    pub sequence: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub partials: Vec<String>,
    pub final_transcript: Option<String>,
    pub language: Option<String>,
    pub assessment: Option<AssessmentResult>,
}

impl Turn {
    pub fn new(sequence: u32, speaker: Speaker) -> Self {
        Self {
            turn_id: TurnId::generate(),
            speaker,
            sequence,
            started_at: Utc::now(),
            ended_at: None,
            partials: Vec::new(),
            final_transcript: None,
            language: None,
            assessment: None,
        }
    }
}

/// What the relay core should do in response to a turn-tracking mutation.
/// Kept as plain data so `turn.rs`/`session.rs` never touch a socket,
/// persistence sink, or assessor directly.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Emit(ServerMessage),
    SchedulePersist(TurnRecord),
    ScheduleAssessment {
        turn_id: TurnId,
        audio: Vec<u8>,
        transcript: String,
    },
}

impl Session {
    /// Start a new turn for `speaker` (spec.md §4.5). Closes out any
    /// current turn first — callers normally only call this from a state
    /// where no turn is open, but this stays defensive since an upstream
    /// `turn_end` can race a fresh `agent_response`.
    pub fn start_turn(&mut self, speaker: Speaker) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        if self.current_turn.is_some() {
            events.extend(self.end_current_turn());
        }

        let sequence = self.turns.len() as u32 + 1;
        let turn = Turn::new(sequence, speaker);
        self.state = match speaker {
            Speaker::Learner => SessionState::LearnerSpeaking,
            Speaker::Agent => SessionState::AgentSpeaking,
        };

        events.push(TurnEvent::Emit(ServerMessage::TurnStart {
            speaker,
            sequence,
            turn_id: turn.turn_id.as_str().to_string(),
        }));

        self.current_turn = Some(turn);
        self.touch();
        events
    }

    /// Accumulate a partial transcript fragment for `speaker` (spec.md
    /// §4.5). Ignored if there is no open turn, or the open turn belongs to
    /// a different speaker — the relay is expected to have already opened
    /// the correct turn before any transcript arrives for it.
    ///
    /// When `is_final` is set for a learner fragment and pronunciation
    /// feedback is enabled, schedules an assessment against the buffered
    /// ring-buffer audio (spec.md §4.6) — independent of whether the turn
    /// itself has ended yet.
    pub fn append_partial(
        &mut self,
        speaker: Speaker,
        text: String,
        is_final: bool,
        language: Option<String>,
    ) -> Vec<TurnEvent> {
        let mut events = Vec::new();

        let turn_id = match &mut self.current_turn {
            Some(t) if t.speaker == speaker => {
                t.partials.push(text.clone());
                if language.is_some() {
                    t.language = language.clone();
                }
                t.turn_id.clone()
            }
            _ => return events,
        };

        events.push(TurnEvent::Emit(ServerMessage::Transcript {
            speaker,
            text,
            is_final,
            turn_id: Some(turn_id.as_str().to_string()),
            language,
        }));

        let should_assess =
            is_final && speaker == Speaker::Learner && self.config.pronunciation_feedback_enabled;
        if should_assess {
            let audio = self.ring_buffer.take();
            let transcript = self
                .current_turn
                .as_ref()
                .map(|t| t.partials.join(" "))
                .unwrap_or_default();
            events.push(TurnEvent::ScheduleAssessment {
                turn_id,
                audio,
                transcript,
            });
        }

        self.touch();
        events
    }

    /// Close the current turn (spec.md §4.5): set `ended_at`, accumulate
    /// speaking time, join partials into `final_transcript`, append to the
    /// turn log, emit `turn.end`, and enqueue a persistence request. No-op
    /// if no turn is open.
    pub fn end_current_turn(&mut self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        let Some(mut turn) = self.current_turn.take() else {
            return events;
        };

        let ended_at = Utc::now();
        turn.ended_at = Some(ended_at);
        turn.final_transcript = Some(turn.partials.join(" "));

        let duration_ms = ended_at
            .signed_duration_since(turn.started_at)
            .num_milliseconds();
        match turn.speaker {
            Speaker::Learner => self.metrics.learner_speaking_ms += duration_ms,
            Speaker::Agent => self.metrics.agent_speaking_ms += duration_ms,
        }

        events.push(TurnEvent::Emit(ServerMessage::TurnEnd {
            speaker: turn.speaker,
            sequence: turn.sequence,
            turn_id: turn.turn_id.as_str().to_string(),
        }));

        events.push(TurnEvent::SchedulePersist(TurnRecord {
            turn_id: turn.turn_id.clone(),
            session_id: self.session_id.clone(),
            speaker: turn.speaker.as_str().to_string(),
            sequence: turn.sequence,
            started_at: turn.started_at,
            ended_at,
            final_transcript: turn.final_transcript.clone().unwrap_or_default(),
            language: turn.language.clone(),
            assessment: None,
        }));

        self.metrics.turn_count += 1;
        self.turns.push(turn);
        self.state = SessionState::Ready;
        self.touch();
        events
    }

    /// Record an assessment result against a turn (spec.md §4.6) and emit
    /// pronunciation feedback for words under the configured threshold.
    /// The turn may still be open (assessment was scheduled mid-turn) or
    /// already finalized into the turn log — checked in that order.
    pub fn record_assessment(
        &mut self,
        turn_id: &TurnId,
        assessment: AssessmentResult,
        threshold: f32,
    ) -> Vec<TurnEvent> {
        let mut events = Vec::new();

        let turn = if self
            .current_turn
            .as_ref()
            .is_some_and(|t| &t.turn_id == turn_id)
        {
            self.current_turn.as_mut()
        } else {
            self.turns.iter_mut().find(|t| &t.turn_id == turn_id)
        };
        let Some(turn) = turn else {
            return events;
        };

        for word in &assessment.words {
            if word.score < threshold {
                events.push(TurnEvent::Emit(ServerMessage::PronunciationFeedback {
                    turn_id: turn_id.as_str().to_string(),
                    word: word.word.clone(),
                    score: word.score,
                }));
            }
        }

        events.push(TurnEvent::Emit(ServerMessage::Assessment {
            turn_id: turn_id.as_str().to_string(),
            overall_pronunciation: assessment.overall_pronunciation,
            overall_fluency: assessment.overall_fluency,
            overall_grammar: assessment.overall_grammar,
            issues: assessment.issues.clone(),
        }));

        turn.assessment = Some(assessment);
        events
    }

    /// Build the end-of-session summary (spec.md §4.7).
    pub fn build_session_end(&self, reason: EndReason) -> ServerMessage {
        let assessed: Vec<&Turn> = self.turns.iter().filter(|t| t.assessment.is_some()).collect();
        let avg = |f: fn(&AssessmentResult) -> f32| -> Option<f32> {
            if assessed.is_empty() {
                return None;
            }
            let sum: f32 = assessed.iter().map(|t| f(t.assessment.as_ref().unwrap())).sum();
            Some(sum / assessed.len() as f32)
        };

        let mut issue_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for t in &assessed {
            for issue in &t.assessment.as_ref().unwrap().issues {
                *issue_counts.entry(issue.clone()).or_insert(0) += 1;
            }
        }
        let mut top_issues: Vec<String> = issue_counts.into_keys().collect();
        top_issues.sort();
        top_issues.truncate(5);

        ServerMessage::SessionEnd {
            reason,
            summary: vrelay_protocol::SessionSummary {
                duration_ms: self.duration_ms(),
                turn_count: self.metrics.turn_count,
                average_pronunciation: avg(|a| a.overall_pronunciation),
                average_grammar: avg(|a| a.overall_grammar),
                average_fluency: avg(|a| a.overall_fluency),
                top_issues,
                competencies_updated: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrelay_domain::config::SessionConfig;
    use vrelay_domain::ids::{AgentId, LearnerId, SessionId, TenantId};

    fn make_session() -> Session {
        let mut s = Session::new(
            SessionId::from("s1"),
            TenantId::from("t1"),
            LearnerId::from("l1"),
            AgentId::from("a1"),
            SessionConfig::default(),
            1024,
        );
        s.state = SessionState::Ready;
        s
    }

    #[test]
    fn start_turn_opens_current_turn_and_sets_state() {
        let mut s = make_session();
        let events = s.start_turn(Speaker::Learner);
        assert!(s.current_turn.is_some());
        assert_eq!(s.state, SessionState::LearnerSpeaking);
        assert!(matches!(events[0], TurnEvent::Emit(ServerMessage::TurnStart { .. })));
    }

    #[test]
    fn end_current_turn_closes_and_returns_to_ready() {
        let mut s = make_session();
        s.start_turn(Speaker::Learner);
        s.append_partial(Speaker::Learner, "hello there".into(), false, None);
        let events = s.end_current_turn();
        assert!(s.current_turn.is_none());
        assert_eq!(s.state, SessionState::Ready);
        assert_eq!(s.turns.len(), 1);
        assert_eq!(s.metrics.turn_count, 1);
        assert_eq!(s.turns[0].final_transcript.as_deref(), Some("hello there"));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::Emit(ServerMessage::TurnEnd { .. }))));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::SchedulePersist(_))));
    }

    #[test]
    fn final_partial_schedules_assessment_for_learner() {
        let mut s = make_session();
        s.start_turn(Speaker::Learner);
        s.ring_buffer.push(&[1, 2, 3]);
        let events = s.append_partial(Speaker::Learner, "hi".into(), true, None);
        assert!(events.iter().any(|e| matches!(e, TurnEvent::ScheduleAssessment { .. })));
        // ring buffer was drained for the assessment
        assert!(s.ring_buffer.is_empty());
    }

    #[test]
    fn agent_turn_never_schedules_assessment() {
        let mut s = make_session();
        s.start_turn(Speaker::Agent);
        s.ring_buffer.push(&[1, 2, 3]);
        let events = s.append_partial(Speaker::Agent, "hi".into(), true, None);
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::ScheduleAssessment { .. })));
    }

    #[test]
    fn final_partial_schedules_assessment_even_with_empty_buffer() {
        // spec.md §4.5 names no buffer-emptiness precondition: a final
        // learner transcript schedules an assessment whenever feedback is
        // enabled, even if no audio happens to be buffered right now (e.g.
        // back-to-back `user_transcript` events within the same turn).
        let mut s = make_session();
        s.start_turn(Speaker::Learner);
        assert!(s.ring_buffer.is_empty());
        let events = s.append_partial(Speaker::Learner, "hi".into(), true, None);
        assert!(events.iter().any(|e| matches!(e, TurnEvent::ScheduleAssessment { .. })));
    }

    #[test]
    fn disabled_feedback_skips_assessment() {
        let mut s = make_session();
        s.config.pronunciation_feedback_enabled = false;
        s.start_turn(Speaker::Learner);
        s.ring_buffer.push(&[1, 2, 3]);
        let events = s.append_partial(Speaker::Learner, "hi".into(), true, None);
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::ScheduleAssessment { .. })));
    }

    #[test]
    fn append_partial_ignored_without_open_turn() {
        let mut s = make_session();
        let events = s.append_partial(Speaker::Learner, "hi".into(), false, None);
        assert!(events.is_empty());
    }

    #[test]
    fn append_partial_ignored_on_speaker_mismatch() {
        let mut s = make_session();
        s.start_turn(Speaker::Learner);
        let events = s.append_partial(Speaker::Agent, "hi".into(), false, None);
        assert!(events.is_empty());
    }

    #[test]
    fn ending_with_no_current_turn_is_a_noop() {
        let mut s = make_session();
        let events = s.end_current_turn();
        assert!(events.is_empty());
    }

    #[test]
    fn record_assessment_emits_feedback_below_threshold() {
        let mut s = make_session();
        s.start_turn(Speaker::Learner);
        let turn_id = s.current_turn.as_ref().unwrap().turn_id.clone();
        s.end_current_turn();

        let assessment = AssessmentResult {
            overall_pronunciation: 0.8,
            overall_fluency: 0.9,
            overall_grammar: 0.95,
            words: vec![
                vrelay_domain::assessor::WordScore { word: "a".into(), score: 0.4 },
                vrelay_domain::assessor::WordScore { word: "b".into(), score: 0.9 },
            ],
            issues: vec!["stress".into()],
        };
        let events = s.record_assessment(&turn_id, assessment, 0.6);
        let feedback_count = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::Emit(ServerMessage::PronunciationFeedback { .. })))
            .count();
        assert_eq!(feedback_count, 1);
    }

    #[test]
    fn record_assessment_works_against_still_open_turn() {
        let mut s = make_session();
        s.start_turn(Speaker::Learner);
        let turn_id = s.current_turn.as_ref().unwrap().turn_id.clone();

        let assessment = AssessmentResult {
            overall_pronunciation: 1.0,
            overall_fluency: 1.0,
            overall_grammar: 1.0,
            words: vec![],
            issues: vec![],
        };
        s.record_assessment(&turn_id, assessment, 0.6);
        assert!(s.current_turn.as_ref().unwrap().assessment.is_some());
    }

    #[test]
    fn summary_has_no_averages_when_nothing_assessed() {
        let mut s = make_session();
        s.start_turn(Speaker::Agent);
        s.end_current_turn();
        let msg = s.build_session_end(EndReason::Completed);
        match msg {
            ServerMessage::SessionEnd { summary, .. } => {
                assert!(summary.average_pronunciation.is_none());
                assert_eq!(summary.turn_count, 1);
            }
            _ => panic!("expected SessionEnd"),
        }
    }
}
