//! # Voice Pipeline
//!
//! Runs one linear pass over a recording or uploaded file:
//!
//! ```text
//! encode WAV ─▶ transcribe ─▶ (therapist) prompt + chat ─▶ (optional) speech
//! ```
//!
//! ## Message Passing:
//! `spawn` starts two tasks. The stage worker calls the providers and reports
//! progress as `StageEvent`s over an mpsc channel; the driver applies each
//! event to the session with `TherapySession::apply`. The driver is the only
//! code that moves a session through its pipeline states.
//!
//! ## Cancellation:
//! Each provider call races a child of the run's `CancellationToken`. A
//! cancelled run drops its in-flight request and reports `Cancelled`, which
//! the session ignores because the run is no longer current.
//!
//! ## Artifacts:
//! Written under `<output_dir>/<session_id>/`. Failing to write
//! `recording.wav` fails the run; the text and reply audio files are best
//! effort and only logged.

use crate::audio::session::{PipelineMode, PipelineRun, SessionState, StageEvent};
use crate::audio::{AudioBuffer, AudioError, TherapySession, WavEncoder, WavFile};
use crate::config::PipelineConfig;
use crate::providers::{AudioUpload, ProviderError, Providers};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECORDING_FILE: &str = "recording.wav";
const TRANSCRIPT_FILE: &str = "recording_transcript.txt";
const REPLY_TEXT_FILE: &str = "reply.txt";
const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Audio entering the pipeline.
#[derive(Debug)]
pub enum PipelineInput {
    /// Captured microphone samples, encoded to WAV before upload
    Recording(AudioBuffer),
    /// A file the client uploaded (MP3, WAV, ...), sent to transcription as is
    Upload(AudioUpload),
}

#[derive(Debug, thiserror::Error)]
enum StageError {
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("{0}")]
    Internal(String),
}

#[derive(Clone)]
pub struct Pipeline {
    providers: Providers,
    prompt_prefix: String,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(providers: Providers, config: &PipelineConfig) -> Self {
        Self {
            providers,
            prompt_prefix: config.prompt_prefix.clone(),
            output_dir: PathBuf::from(&config.output_dir),
        }
    }

    /// Directory holding a session's artifacts.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.output_dir.join(session_id)
    }

    /// Start a run in the background.
    ///
    /// ## Returns:
    /// Handle to the driver task; it resolves to the session state after the
    /// last event of this run was applied.
    pub fn spawn(
        &self,
        session: Arc<TherapySession>,
        run: PipelineRun,
        input: PipelineInput,
    ) -> JoinHandle<SessionState> {
        let (tx, mut rx) = mpsc::channel::<StageEvent>(EVENT_CHANNEL_CAPACITY);

        let worker = StageWorker {
            pipeline: self.clone(),
            session_id: session.session_id.clone(),
            run: run.clone(),
            tx,
        };
        tokio::spawn(worker.run(input));

        let run_id = run.run_id;
        tokio::spawn(async move {
            let mut state = session.state();
            while let Some(event) = rx.recv().await {
                debug!(
                    session_id = %session.session_id,
                    run_id,
                    event = event_name(&event),
                    "Applying pipeline event"
                );
                state = session.apply(run_id, event);
            }
            state
        })
    }
}

fn event_name(event: &StageEvent) -> &'static str {
    match event {
        StageEvent::RecordingEncoded(_) => "recording_encoded",
        StageEvent::Transcribed(_) => "transcribed",
        StageEvent::Replied(_) => "replied",
        StageEvent::Synthesized(_) => "synthesized",
        StageEvent::Failed(_) => "failed",
        StageEvent::Cancelled => "cancelled",
    }
}

struct StageWorker {
    pipeline: Pipeline,
    session_id: String,
    run: PipelineRun,
    tx: mpsc::Sender<StageEvent>,
}

impl StageWorker {
    async fn run(self, input: PipelineInput) {
        let started = std::time::Instant::now();
        let outcome = self.execute(input).await;

        match outcome {
            Ok(()) => info!(
                session_id = %self.session_id,
                run_id = self.run.run_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline run completed"
            ),
            Err(StageError::Cancelled) => {
                info!(session_id = %self.session_id, run_id = self.run.run_id, "Pipeline run cancelled");
                self.send(StageEvent::Cancelled).await;
            }
            Err(err) => {
                error!(
                    session_id = %self.session_id,
                    run_id = self.run.run_id,
                    error = %err,
                    "Pipeline run failed"
                );
                self.send(StageEvent::Failed(err.to_string())).await;
            }
        }
    }

    async fn execute(&self, input: PipelineInput) -> Result<(), StageError> {
        let dir = self.pipeline.session_dir(&self.session_id);
        self.ensure_active()?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(AudioError::from)?;

        let upload = match input {
            PipelineInput::Recording(buffer) => {
                let wav = WavEncoder::encode(&buffer)?;
                self.ensure_active()?;
                save_wav(dir.join(RECORDING_FILE), wav.clone()).await?;
                debug!(
                    session_id = %self.session_id,
                    bytes = wav.len(),
                    seconds = buffer.duration_seconds(),
                    "Recording encoded"
                );
                self.send(StageEvent::RecordingEncoded(wav.clone())).await;
                AudioUpload::wav(RECORDING_FILE, wav)
            }
            PipelineInput::Upload(upload) => upload,
        };

        let transcript = self
            .guarded(self.pipeline.providers.transcriber.transcribe(upload))
            .await?;
        self.ensure_active()?;
        save_text(&dir.join(TRANSCRIPT_FILE), &transcript).await;
        self.send(StageEvent::Transcribed(transcript.clone())).await;

        if self.run.mode == PipelineMode::Journal {
            return Ok(());
        }

        let prompt = format!("{}{}", self.pipeline.prompt_prefix, transcript);
        let reply = self
            .guarded(self.pipeline.providers.chat.reply(&prompt))
            .await?;
        self.ensure_active()?;
        save_text(&dir.join(REPLY_TEXT_FILE), &reply).await;
        self.send(StageEvent::Replied(reply.clone())).await;

        if !self.run.synthesize_speech {
            return Ok(());
        }

        let speech = self
            .guarded(self.pipeline.providers.speech.synthesize(&reply))
            .await?;
        self.ensure_active()?;
        let audio_path = dir.join(format!("reply.{}", speech.file_extension()));
        if let Err(e) = tokio::fs::write(&audio_path, &speech.bytes).await {
            warn!(path = %audio_path.display(), error = %e, "Failed to save reply audio");
        }
        self.send(StageEvent::Synthesized(speech)).await;

        Ok(())
    }

    /// Artifacts of a cancelled run must not land in the session directory,
    /// which a newer run may already be writing to.
    fn ensure_active(&self) -> Result<(), StageError> {
        if self.run.token.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    /// Await a provider call unless the run is cancelled first.
    async fn guarded<T, F>(&self, call: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let token: CancellationToken = self.run.token.child_token();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(StageError::Cancelled),
            result = call => result.map_err(StageError::from),
        }
    }

    async fn send(&self, event: StageEvent) {
        if self.tx.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "Pipeline driver is gone, dropping event");
        }
    }
}

async fn save_wav(path: PathBuf, wav: WavFile) -> Result<(), StageError> {
    tokio::task::spawn_blocking(move || wav.save(&path))
        .await
        .map_err(|e| StageError::Internal(format!("WAV writer task failed: {}", e)))??;
    Ok(())
}

async fn save_text(path: &Path, text: &str) {
    if let Err(e) = tokio::fs::write(path, text).await {
        warn!(path = %path.display(), error = %e, "Failed to save text artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::CaptureSettings;
    use crate::providers::{ChatModel, SpeechSynthesizer, SynthesizedSpeech, Transcriber};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubTranscriber {
        text: &'static str,
        delay: Duration,
        uploads: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, audio: AudioUpload) -> Result<String, ProviderError> {
            self.uploads
                .lock()
                .unwrap()
                .push((audio.filename, audio.content_type, audio.bytes.len()));
            tokio::time::sleep(self.delay).await;
            Ok(self.text.to_string())
        }
    }

    struct StubChat {
        fail: bool,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for StubChat {
        async fn reply(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                return Err(ProviderError::Status {
                    service: "chat",
                    status: 500,
                    body: "overloaded".to_string(),
                });
            }
            Ok("Try a short walk.".to_string())
        }
    }

    struct StubSpeech {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for StubSpeech {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedSpeech, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SynthesizedSpeech {
                bytes: vec![0xFF, 0xFB, 0x10],
                content_type: "audio/mpeg".to_string(),
            })
        }
    }

    struct Harness {
        transcriber: Arc<StubTranscriber>,
        chat: Arc<StubChat>,
        speech: Arc<StubSpeech>,
        pipeline: Pipeline,
    }

    fn harness(output_dir: &Path, transcribe_delay: Duration, chat_fails: bool) -> Harness {
        let transcriber = Arc::new(StubTranscriber {
            text: "I could not sleep",
            delay: transcribe_delay,
            uploads: Mutex::new(Vec::new()),
        });
        let chat = Arc::new(StubChat {
            fail: chat_fails,
            prompts: Mutex::new(Vec::new()),
        });
        let speech = Arc::new(StubSpeech {
            calls: AtomicUsize::new(0),
        });
        let providers = Providers {
            transcriber: transcriber.clone(),
            chat: chat.clone(),
            speech: speech.clone(),
        };
        let config = PipelineConfig {
            prompt_prefix: "Respond kindly: ".to_string(),
            synthesize_speech: true,
            output_dir: output_dir.to_string_lossy().to_string(),
        };

        Harness {
            transcriber,
            chat,
            speech,
            pipeline: Pipeline::new(providers, &config),
        }
    }

    fn recorded(mode: PipelineMode, synthesize: bool) -> (Arc<TherapySession>, PipelineRun, AudioBuffer) {
        let session = Arc::new(TherapySession::new(
            "s1".to_string(),
            mode,
            CaptureSettings::default(),
        ));
        session.start_recording().unwrap();
        let pcm: Vec<u8> = [1000i16, -1000, 2000, -2000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        session.add_audio(&pcm).unwrap();
        let (buffer, run) = session.finish_recording(synthesize).unwrap().unwrap();
        (session, run, buffer)
    }

    #[tokio::test]
    async fn test_therapist_run_with_speech() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::ZERO, false);
        let (session, run, buffer) = recorded(PipelineMode::Therapist, true);

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Playing);
        assert_eq!(session.transcript().as_deref(), Some("I could not sleep"));
        assert_eq!(session.reply_text().as_deref(), Some("Try a short walk."));
        assert_eq!(session.reply_audio().unwrap().content_type, "audio/mpeg");
        assert_eq!(session.recording().unwrap().len(), 44 + 4 * 2);

        let uploads = h.transcriber.uploads.lock().unwrap().clone();
        assert_eq!(uploads, vec![("recording.wav".to_string(), "audio/wav".to_string(), 52)]);
        assert_eq!(
            h.chat.prompts.lock().unwrap().as_slice(),
            ["Respond kindly: I could not sleep".to_string()]
        );

        let session_dir = dir.path().join("s1");
        assert_eq!(std::fs::read(session_dir.join("recording.wav")).unwrap().len(), 52);
        assert_eq!(
            std::fs::read_to_string(session_dir.join("recording_transcript.txt")).unwrap(),
            "I could not sleep"
        );
        assert_eq!(
            std::fs::read_to_string(session_dir.join("reply.txt")).unwrap(),
            "Try a short walk."
        );
        assert_eq!(std::fs::read(session_dir.join("reply.mp3")).unwrap(), vec![0xFF, 0xFB, 0x10]);
    }

    #[tokio::test]
    async fn test_text_only_reply_skips_speech() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::ZERO, false);
        let (session, run, buffer) = recorded(PipelineMode::Therapist, false);

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Playing);
        assert!(session.reply_audio().is_none());
        assert_eq!(h.speech.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_journal_run_stops_after_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::ZERO, false);
        let (session, run, buffer) = recorded(PipelineMode::Journal, true);

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Idle);
        assert_eq!(session.transcript().as_deref(), Some("I could not sleep"));
        assert!(h.chat.prompts.lock().unwrap().is_empty());
        assert!(dir.path().join("s1/recording_transcript.txt").exists());
        assert!(!dir.path().join("s1/reply.txt").exists());
    }

    #[tokio::test]
    async fn test_chat_failure_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::ZERO, true);
        let (session, run, buffer) = recorded(PipelineMode::Therapist, true);

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer))
            .await
            .unwrap();

        match state {
            SessionState::Failed(reason) => assert!(reason.contains("overloaded")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(session.transcript().as_deref(), Some("I could not sleep"));
        assert_eq!(h.speech.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("s1/reply.txt").exists());
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::from_secs(30), false);
        let (session, run, buffer) = recorded(PipelineMode::Therapist, true);

        let handle = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.cancel());

        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancelled run should finish promptly")
            .unwrap();

        assert_eq!(state, SessionState::Idle);
        assert!(session.transcript().is_none());
        assert!(h.chat.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::ZERO, false);
        let (session, run, buffer) = recorded(PipelineMode::Therapist, true);
        assert!(session.cancel());

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Idle);
        assert!(session.recording().is_none());
        assert!(h.transcriber.uploads.lock().unwrap().is_empty());
        assert!(!dir.path().join("s1/recording.wav").exists());
        assert!(!dir.path().join("s1").exists());
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();

        let h = harness(&blocker, Duration::ZERO, false);
        let (session, run, buffer) = recorded(PipelineMode::Therapist, true);

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Recording(buffer))
            .await
            .unwrap();

        assert!(matches!(state, SessionState::Failed(_)));
        assert!(h.transcriber.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uploaded_file_is_sent_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), Duration::ZERO, false);
        let session = Arc::new(TherapySession::new(
            "upload".to_string(),
            PipelineMode::Journal,
            CaptureSettings::default(),
        ));
        let run = session.begin_upload(false).unwrap();
        let upload = AudioUpload::from_file("testFile.mp3", vec![7; 10], None);

        let state = h
            .pipeline
            .spawn(session.clone(), run, PipelineInput::Upload(upload))
            .await
            .unwrap();

        assert_eq!(state, SessionState::Idle);
        assert!(session.recording().is_none());
        let uploads = h.transcriber.uploads.lock().unwrap().clone();
        assert_eq!(uploads, vec![("testFile.mp3".to_string(), "audio/mpeg".to_string(), 10)]);
    }
}
