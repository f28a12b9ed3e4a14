//! # Therapy Session Management
//!
//! Each session owns one microphone capture and walks a linear pipeline:
//!
//! ```text
//!            start_recording          finish_recording
//!   Idle ─────────────────▶ Recording ───────────────▶ Transcribing
//!    ▲                         │                          │
//!    │◀──── cancel_recording ──┘          journal mode ◀──┤
//!    │                                                    ▼
//!    │                                              AwaitingReply
//!    │                                                    │
//!    │                                     text only ◀────┤
//!    │                                                    ▼
//!    │◀──── acknowledge_playback ─── Playing ◀──── Synthesizing
//! ```
//!
//! Any in-flight stage can fall into `Failed(reason)`; cancelling an in-flight
//! run returns the session to `Idle`. `Failed` and `Playing` both accept a new
//! recording.
//!
//! ## Run Isolation:
//! Every pipeline run gets a run id and its own `CancellationToken`. Events
//! from a run that was cancelled (or superseded) are ignored, so a slow
//! provider response can never overwrite a newer run's results.

use crate::audio::buffer::{AudioBuffer, CaptureBuffer, MIN_RECORDED_FRAMES};
use crate::audio::wav::WavFile;
use crate::audio::AudioError;
use crate::providers::SynthesizedSpeech;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a session does with a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Transcribe, ask the chat model for a reply, optionally speak it
    #[default]
    Therapist,
    /// Transcribe and keep the transcript as a journal entry
    Journal,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Therapist => "therapist",
            PipelineMode::Journal => "journal",
        }
    }
}

impl std::str::FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "therapist" => Ok(PipelineMode::Therapist),
            "journal" => Ok(PipelineMode::Journal),
            _ => Err(format!("Unknown pipeline mode: {}", s)),
        }
    }
}

/// Where a session currently sits in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Recording,
    Transcribing,
    AwaitingReply,
    Synthesizing,
    /// A reply is ready for the client to play back
    Playing,
    Failed(String),
}

impl SessionState {
    /// Status string used in API responses.
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Transcribing => "transcribing",
            SessionState::AwaitingReply => "awaiting_reply",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Playing => "playing",
            SessionState::Failed(_) => "failed",
        }
    }

    /// True while a pipeline run is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Transcribing | SessionState::AwaitingReply | SessionState::Synthesizing
        )
    }

    /// States from which a fresh recording or upload may begin.
    fn accepts_new_input(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Playing | SessionState::Failed(_)
        )
    }
}

/// Messages a pipeline run sends back to its session.
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// The captured audio was encoded; kept so clients can download it
    RecordingEncoded(WavFile),
    Transcribed(String),
    Replied(String),
    Synthesized(SynthesizedSpeech),
    Failed(String),
    Cancelled,
}

/// Handle for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: u64,
    pub token: CancellationToken,
    pub mode: PipelineMode,
    pub synthesize_speech: bool,
}

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("Session is busy processing a previous recording")]
    Busy,

    #[error("Maximum concurrent sessions ({0}) reached")]
    LimitReached(usize),

    #[error("Session ID '{0}' already exists")]
    DuplicateId(String),

    #[error("Invalid session ID '{0}': use 1-64 letters, digits, '-' or '_'")]
    InvalidId(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Capture parameters applied to new sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub channels: u16,
    pub sample_rate: u32,
    pub max_recording_secs: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 16000,
            max_recording_secs: 30,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    run: Option<PipelineRun>,
    next_run_id: u64,
    recording_started_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
    recording: Option<WavFile>,
    transcript: Option<String>,
    reply_text: Option<String>,
    reply_audio: Option<SynthesizedSpeech>,
    completed_runs: u32,
    failed_runs: u32,
}

impl SessionInner {
    fn clear_results(&mut self) {
        self.recording = None;
        self.transcript = None;
        self.reply_text = None;
        self.reply_audio = None;
    }

    fn start_run(&mut self, mode: PipelineMode, synthesize_speech: bool) -> PipelineRun {
        self.next_run_id += 1;
        let run = PipelineRun {
            run_id: self.next_run_id,
            token: CancellationToken::new(),
            mode,
            synthesize_speech,
        };
        self.state = SessionState::Transcribing;
        self.run = Some(run.clone());
        run
    }

    fn finish_run(&mut self, next: SessionState) {
        match &next {
            SessionState::Failed(_) => self.failed_runs += 1,
            SessionState::Idle | SessionState::Playing => self.completed_runs += 1,
            _ => {}
        }
        self.state = next;
        self.run = None;
    }
}

/// A single journaling/therapy conversation.
///
/// ## Thread Safety:
/// All mutable state lives behind one `RwLock` so every transition is atomic.
/// The capture buffer has its own lock so audio chunks don't contend with
/// status reads.
pub struct TherapySession {
    pub session_id: String,
    pub mode: PipelineMode,
    pub created_at: DateTime<Utc>,
    capture: CaptureBuffer,
    inner: RwLock<SessionInner>,
}

impl TherapySession {
    pub fn new(session_id: String, mode: PipelineMode, capture: CaptureSettings) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            mode,
            created_at: now,
            capture: CaptureBuffer::new(
                capture.channels,
                capture.sample_rate,
                capture.max_recording_secs,
            ),
            inner: RwLock::new(SessionInner {
                state: SessionState::Idle,
                run: None,
                next_run_id: 0,
                recording_started_at: None,
                last_activity: now,
                recording: None,
                transcript: None,
                reply_text: None,
                reply_audio: None,
                completed_runs: 0,
                failed_runs: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.last_activity = Utc::now();
        inner
    }

    pub fn state(&self) -> SessionState {
        self.read().state.clone()
    }

    /// Begin a new recording.
    ///
    /// ## State Transition:
    /// Idle/Playing/Failed → Recording. Previous results are discarded.
    pub fn start_recording(&self) -> Result<(), SessionError> {
        let mut inner = self.write();

        if inner.state.is_busy() {
            return Err(SessionError::Busy);
        }
        if !inner.state.accepts_new_input() {
            return Err(SessionError::InvalidTransition {
                action: "start recording",
                state: inner.state.as_str().to_string(),
            });
        }

        self.capture.clear();
        inner.clear_results();
        inner.state = SessionState::Recording;
        inner.recording_started_at = Some(Utc::now());
        Ok(())
    }

    /// Append a chunk of 16-bit little-endian PCM to the current recording.
    ///
    /// ## Returns:
    /// Samples accepted; zero once the maximum recording length is reached.
    pub fn add_audio(&self, data: &[u8]) -> Result<usize, SessionError> {
        let inner = self.write();
        if inner.state != SessionState::Recording {
            return Err(SessionError::InvalidTransition {
                action: "accept audio",
                state: inner.state.as_str().to_string(),
            });
        }
        Ok(self.capture.append_pcm16_le(data)?)
    }

    /// Discard the current recording.
    ///
    /// ## State Transition:
    /// Recording → Idle
    pub fn cancel_recording(&self) -> Result<(), SessionError> {
        let mut inner = self.write();
        if inner.state != SessionState::Recording {
            return Err(SessionError::InvalidTransition {
                action: "cancel recording",
                state: inner.state.as_str().to_string(),
            });
        }

        self.capture.clear();
        inner.state = SessionState::Idle;
        inner.recording_started_at = None;
        Ok(())
    }

    /// Stop recording and hand the captured audio to a new pipeline run.
    ///
    /// ## State Transition:
    /// Recording → Transcribing, or Recording → Idle when fewer than two
    /// frames were captured (`Ok(None)`).
    pub fn finish_recording(
        &self,
        synthesize_speech: bool,
    ) -> Result<Option<(AudioBuffer, PipelineRun)>, SessionError> {
        let mut inner = self.write();
        if inner.state != SessionState::Recording {
            return Err(SessionError::InvalidTransition {
                action: "stop recording",
                state: inner.state.as_str().to_string(),
            });
        }

        let buffer = self.capture.take()?;
        if buffer.frame_count() < MIN_RECORDED_FRAMES {
            inner.state = SessionState::Idle;
            return Ok(None);
        }

        let run = inner.start_run(self.mode, synthesize_speech);
        Ok(Some((buffer, run)))
    }

    /// Start a pipeline run from an uploaded audio file instead of a recording.
    ///
    /// ## State Transition:
    /// Idle/Playing/Failed → Transcribing
    pub fn begin_upload(&self, synthesize_speech: bool) -> Result<PipelineRun, SessionError> {
        let mut inner = self.write();
        if inner.state.is_busy() {
            return Err(SessionError::Busy);
        }
        if !inner.state.accepts_new_input() {
            return Err(SessionError::InvalidTransition {
                action: "upload audio",
                state: inner.state.as_str().to_string(),
            });
        }

        inner.clear_results();
        Ok(inner.start_run(self.mode, synthesize_speech))
    }

    /// Apply an event reported by a pipeline run.
    ///
    /// Events from stale runs are ignored and leave the state untouched.
    pub fn apply(&self, run_id: u64, event: StageEvent) -> SessionState {
        let mut inner = self.write();

        let (mode, synthesize_speech) = match &inner.run {
            Some(run) if run.run_id == run_id => (run.mode, run.synthesize_speech),
            _ => {
                tracing::debug!(
                    session_id = %self.session_id,
                    run_id,
                    "Ignoring event from stale pipeline run"
                );
                return inner.state.clone();
            }
        };

        match (inner.state.clone(), event) {
            (SessionState::Transcribing, StageEvent::RecordingEncoded(wav)) => {
                inner.recording = Some(wav);
            }
            (SessionState::Transcribing, StageEvent::Transcribed(text)) => {
                inner.transcript = Some(text);
                match mode {
                    PipelineMode::Journal => inner.finish_run(SessionState::Idle),
                    PipelineMode::Therapist => inner.state = SessionState::AwaitingReply,
                }
            }
            (SessionState::AwaitingReply, StageEvent::Replied(text)) => {
                inner.reply_text = Some(text);
                if synthesize_speech {
                    inner.state = SessionState::Synthesizing;
                } else {
                    inner.finish_run(SessionState::Playing);
                }
            }
            (SessionState::Synthesizing, StageEvent::Synthesized(speech)) => {
                inner.reply_audio = Some(speech);
                inner.finish_run(SessionState::Playing);
            }
            (_, StageEvent::Failed(reason)) => {
                inner.finish_run(SessionState::Failed(reason));
            }
            (_, StageEvent::Cancelled) => {
                inner.finish_run(SessionState::Idle);
            }
            (state, event) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    state = state.as_str(),
                    event = ?event,
                    "Pipeline event does not match session state"
                );
            }
        }

        inner.state.clone()
    }

    /// Cancel the in-flight pipeline run, if any.
    ///
    /// The session returns to Idle immediately; the run notices its token and stops.
    pub fn cancel(&self) -> bool {
        let mut inner = self.write();
        match inner.run.take() {
            Some(run) => {
                run.token.cancel();
                inner.state = SessionState::Idle;
                true
            }
            None => false,
        }
    }

    /// The client finished playing the reply.
    ///
    /// ## State Transition:
    /// Playing → Idle
    pub fn acknowledge_playback(&self) -> Result<(), SessionError> {
        let mut inner = self.write();
        if inner.state != SessionState::Playing {
            return Err(SessionError::InvalidTransition {
                action: "acknowledge playback",
                state: inner.state.as_str().to_string(),
            });
        }
        inner.state = SessionState::Idle;
        Ok(())
    }

    pub fn transcript(&self) -> Option<String> {
        self.read().transcript.clone()
    }

    pub fn reply_text(&self) -> Option<String> {
        self.read().reply_text.clone()
    }

    pub fn reply_audio(&self) -> Option<SynthesizedSpeech> {
        self.read().reply_audio.clone()
    }

    pub fn recording(&self) -> Option<WavFile> {
        self.read().recording.clone()
    }

    /// Seconds of audio in the capture buffer.
    pub fn captured_seconds(&self) -> f64 {
        self.capture.duration_seconds()
    }

    pub fn capture_is_full(&self) -> bool {
        self.capture.is_full()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.read().last_activity
    }

    /// Point-in-time view for API responses.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.read();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            mode: self.mode,
            state: inner.state.as_str().to_string(),
            failure: match &inner.state {
                SessionState::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
            created_at: self.created_at,
            last_activity: inner.last_activity,
            recording_started_at: inner.recording_started_at,
            captured_seconds: self.capture.duration_seconds(),
            transcript: inner.transcript.clone(),
            reply_text: inner.reply_text.clone(),
            has_recording: inner.recording.is_some(),
            has_reply_audio: inner.reply_audio.is_some(),
            completed_runs: inner.completed_runs,
            failed_runs: inner.failed_runs,
        }
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub mode: PipelineMode,
    pub state: String,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub captured_seconds: f64,
    pub transcript: Option<String>,
    pub reply_text: Option<String>,
    pub has_recording: bool,
    pub has_reply_audio: bool,
    pub completed_runs: u32,
    pub failed_runs: u32,
}

/// Manages concurrent sessions.
///
/// ## Resource Management:
/// - Enforces the maximum concurrent session limit
/// - Removes sessions left inactive longer than the configured age
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<TherapySession>>>,
    max_concurrent_sessions: usize,
    capture: CaptureSettings,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize, capture: CaptureSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
            capture,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TherapySession>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TherapySession>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a new session.
    ///
    /// ## Parameters:
    /// - **session_id**: Optional caller-chosen id; a UUID is generated otherwise
    /// - **mode**: Therapist or journal pipeline
    pub fn create_session(
        &self,
        session_id: Option<String>,
        mode: PipelineMode,
    ) -> Result<Arc<TherapySession>, SessionError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if !is_valid_session_id(&session_id) {
            return Err(SessionError::InvalidId(session_id));
        }

        let mut sessions = self.write();
        if sessions.contains_key(&session_id) {
            return Err(SessionError::DuplicateId(session_id));
        }
        if sessions.len() >= self.max_concurrent_sessions {
            return Err(SessionError::LimitReached(self.max_concurrent_sessions));
        }

        let session = Arc::new(TherapySession::new(session_id.clone(), mode, self.capture));
        sessions.insert(session_id, session.clone());
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<TherapySession>> {
        self.read().get(session_id).cloned()
    }

    /// Remove a session, cancelling any in-flight run.
    pub fn remove_session(&self, session_id: &str) -> bool {
        match self.write().remove(session_id) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.read().len()
    }

    pub fn get_active_session_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Remove sessions with no activity for `max_age_seconds`.
    ///
    /// Sessions with a run in flight are never removed.
    pub fn cleanup_old_sessions(&self, max_age_seconds: u64) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();

        sessions.retain(|_, session| {
            let idle_for = now.signed_duration_since(session.last_activity()).num_seconds();
            session.state().is_busy() || idle_for <= max_age_seconds as i64
        });

        before - sessions.len()
    }

    pub fn get_sessions_summary(&self) -> SessionManagerSummary {
        let sessions = self.read();

        let mut state_counts = HashMap::new();
        for session in sessions.values() {
            *state_counts
                .entry(session.state().as_str().to_string())
                .or_insert(0) += 1;
        }

        SessionManagerSummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_concurrent_sessions,
            state_counts,
        }
    }
}

/// Session ids double as artifact directory names, so keep them path-safe.
fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Serialize)]
pub struct SessionManagerSummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub state_counts: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn session(mode: PipelineMode) -> TherapySession {
        TherapySession::new("test".to_string(), mode, CaptureSettings::default())
    }

    fn recorded_run(session: &TherapySession, synthesize: bool) -> PipelineRun {
        session.start_recording().unwrap();
        session.add_audio(&pcm(&[100, -100, 200, -200])).unwrap();
        let (buffer, run) = session.finish_recording(synthesize).unwrap().unwrap();
        assert_eq!(buffer.frame_count(), 4);
        run
    }

    #[test]
    fn test_therapist_happy_path_with_speech() {
        let session = session(PipelineMode::Therapist);
        let run = recorded_run(&session, true);
        assert_eq!(session.state(), SessionState::Transcribing);

        let state = session.apply(run.run_id, StageEvent::Transcribed("I feel tired".into()));
        assert_eq!(state, SessionState::AwaitingReply);

        let state = session.apply(run.run_id, StageEvent::Replied("Get some rest".into()));
        assert_eq!(state, SessionState::Synthesizing);

        let speech = SynthesizedSpeech {
            bytes: vec![1, 2, 3],
            content_type: "audio/mpeg".to_string(),
        };
        let state = session.apply(run.run_id, StageEvent::Synthesized(speech));
        assert_eq!(state, SessionState::Playing);
        assert_eq!(session.reply_audio().unwrap().bytes, vec![1, 2, 3]);

        session.acknowledge_playback().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.snapshot().completed_runs, 1);
    }

    #[test]
    fn test_reply_without_speech_goes_straight_to_playing() {
        let session = session(PipelineMode::Therapist);
        let run = recorded_run(&session, false);
        session.apply(run.run_id, StageEvent::Transcribed("hello".into()));

        let state = session.apply(run.run_id, StageEvent::Replied("hi".into()));
        assert_eq!(state, SessionState::Playing);
        assert_eq!(session.reply_text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_journal_mode_stops_after_transcript() {
        let session = session(PipelineMode::Journal);
        let run = recorded_run(&session, true);

        let state = session.apply(run.run_id, StageEvent::Transcribed("Dear diary".into()));
        assert_eq!(state, SessionState::Idle);
        assert_eq!(session.transcript().as_deref(), Some("Dear diary"));
    }

    #[test]
    fn test_cannot_start_twice() {
        let session = session(PipelineMode::Therapist);
        recorded_run(&session, true);

        assert!(matches!(session.start_recording(), Err(SessionError::Busy)));
        assert!(matches!(session.begin_upload(true), Err(SessionError::Busy)));
    }

    #[test]
    fn test_recording_twice_is_rejected() {
        let session = session(PipelineMode::Therapist);
        session.start_recording().unwrap();
        assert!(matches!(
            session.start_recording(),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_audio_rejected_when_not_recording() {
        let session = session(PipelineMode::Therapist);
        assert!(session.add_audio(&pcm(&[1, 2])).is_err());
    }

    #[test]
    fn test_short_recording_returns_to_idle() {
        let session = session(PipelineMode::Therapist);
        session.start_recording().unwrap();
        session.add_audio(&pcm(&[42])).unwrap();

        assert!(session.finish_recording(true).unwrap().is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_failure_then_retry() {
        let session = session(PipelineMode::Therapist);
        let run = recorded_run(&session, true);

        let state = session.apply(run.run_id, StageEvent::Failed("upstream 500".into()));
        assert_eq!(state, SessionState::Failed("upstream 500".into()));
        assert_eq!(session.snapshot().failure.as_deref(), Some("upstream 500"));

        session.start_recording().unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.snapshot().failed_runs, 1);
    }

    #[test]
    fn test_cancel_ignores_stale_events() {
        let session = session(PipelineMode::Therapist);
        let run = recorded_run(&session, true);

        assert!(session.cancel());
        assert!(run.token.is_cancelled());
        assert_eq!(session.state(), SessionState::Idle);

        let state = session.apply(run.run_id, StageEvent::Transcribed("late".into()));
        assert_eq!(state, SessionState::Idle);
        assert!(session.transcript().is_none());
        assert!(!session.cancel());
    }

    #[test]
    fn test_upload_starts_run() {
        let session = session(PipelineMode::Therapist);
        let run = session.begin_upload(false).unwrap();
        assert_eq!(session.state(), SessionState::Transcribing);
        assert!(!run.synthesize_speech);
    }

    #[test]
    fn test_manager_limits_and_duplicates() {
        let manager = SessionManager::new(2, CaptureSettings::default());
        let first = manager
            .create_session(Some("a".to_string()), PipelineMode::Therapist)
            .unwrap();
        assert_eq!(first.session_id, "a");

        assert!(matches!(
            manager.create_session(Some("a".to_string()), PipelineMode::Journal),
            Err(SessionError::DuplicateId(_))
        ));

        manager.create_session(None, PipelineMode::Journal).unwrap();
        assert!(matches!(
            manager.create_session(None, PipelineMode::Journal),
            Err(SessionError::LimitReached(2))
        ));

        assert!(matches!(
            manager.create_session(Some("../etc".to_string()), PipelineMode::Journal),
            Err(SessionError::InvalidId(_))
        ));
        assert!(matches!(
            manager.create_session(Some("a".to_string()), PipelineMode::Journal),
            Err(SessionError::DuplicateId(_))
        ));

        assert!(manager.remove_session("a"));
        assert!(!manager.remove_session("a"));
        assert_eq!(manager.active_session_count(), 1);
    }

    #[test]
    fn test_cleanup_keeps_busy_sessions() {
        let manager = SessionManager::new(4, CaptureSettings::default());
        manager.create_session(Some("idle".into()), PipelineMode::Therapist).unwrap();
        let busy = manager
            .create_session(Some("busy".into()), PipelineMode::Therapist)
            .unwrap();
        busy.begin_upload(true).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let removed = manager.cleanup_old_sessions(0);

        assert_eq!(removed, 1);
        assert!(manager.get_session("busy").is_some());
        assert!(manager.get_session("idle").is_none());
    }

    #[test]
    fn test_summary_counts_states() {
        let manager = SessionManager::new(4, CaptureSettings::default());
        manager.create_session(None, PipelineMode::Therapist).unwrap();
        let recording = manager.create_session(None, PipelineMode::Therapist).unwrap();
        recording.start_recording().unwrap();

        let summary = manager.get_sessions_summary();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.state_counts.get("idle"), Some(&1));
        assert_eq!(summary.state_counts.get("recording"), Some(&1));
    }
}
