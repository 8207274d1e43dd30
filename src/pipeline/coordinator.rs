//! The main loop: pulls frames from the audio source and fans them out
//! to the engines the current state says may consume them.
//!
//! State routing per frame:
//! - IDLE: wake-word engine only.
//! - LISTENING: STT and VAD; a speaking→silent VAD edge ends the
//!   utterance.
//! - THINKING / SPEAKING / ERROR: the frame is drained and discarded so
//!   the queue cannot overflow.
//!
//! The loop re-examines the state at the moment of fan-out, so frames
//! captured just before a transition deterministically reach the old
//! consumer until the transition is applied.

use crate::audio::{AudioFrame, AudioSource};
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::events::Event;
use crate::fsm::{Fsm, State};
use crate::llm::LlmClient;
use crate::metrics::MetricsRegistry;
use crate::router::EventRouter;
use crate::stt::SttEngine;
use crate::vad::VadEngine;
use crate::wakeword::WakewordEngine;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

/// Sleep applied when the source yields no frame (stopped or draining).
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Internal wakeups delivered to the loop outside the frame path.
#[derive(Debug)]
enum ControlSignal {
    /// The fail-safe listening window expired.
    ListenTimeout,
}

/// What the select loop decided to do next.
enum Step {
    Frame(Option<AudioFrame>),
    Control(ControlSignal),
    Shutdown,
}

/// Owns every engine plus the FSM and drives the turn lifecycle.
pub struct Coordinator {
    config: AssistantConfig,
    audio: AudioSource,
    wakeword: WakewordEngine,
    vad: Option<VadEngine>,
    stt: SttEngine,
    llm: LlmClient,
    fsm: Fsm,
    router: EventRouter,
    metrics: MetricsRegistry,
    cancel: CancellationToken,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    /// VAD state seen on the previous LISTENING frame.
    was_speaking: bool,
    listen_timeout: Option<JoinHandle<()>>,
    /// Set at wake, consumed for first-token latency.
    turn_started_at: Option<Instant>,
}

impl Coordinator {
    /// Build the coordinator with engines constructed from config.
    ///
    /// Model-load failures degrade the affected engine; only an invalid
    /// LLM configuration is an error here.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM client cannot be constructed.
    pub fn new(config: AssistantConfig) -> Result<Self> {
        let audio = AudioSource::new(config.audio.clone());
        let wakeword = WakewordEngine::new(&config.wakeword);
        let vad = if config.vad.enabled {
            Some(VadEngine::new(&config.vad))
        } else {
            None
        };
        let stt = SttEngine::new(&config.stt);
        let llm = LlmClient::new(&config.llm)?;

        Ok(Self::with_engines(config, audio, wakeword, vad, stt, llm))
    }

    /// Build the coordinator around explicit engine instances.
    pub fn with_engines(
        config: AssistantConfig,
        audio: AudioSource,
        wakeword: WakewordEngine,
        vad: Option<VadEngine>,
        stt: SttEngine,
        llm: LlmClient,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            config,
            audio,
            wakeword,
            vad,
            stt,
            llm,
            fsm: Fsm::new(),
            router: EventRouter::new(),
            metrics: MetricsRegistry::new(),
            cancel: CancellationToken::new(),
            control_tx,
            control_rx,
            was_speaking: false,
            listen_timeout: None,
            turn_started_at: None,
        }
    }

    /// Router for registering observers before `run`.
    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    /// The metrics collected so far.
    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Current conversational state.
    #[must_use]
    pub fn state(&self) -> State {
        self.fsm.state()
    }

    /// Token that stops the loop when cancelled (wire it to signals).
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns an error when the capture device cannot be opened at
    /// startup; that failure is fatal by policy.
    pub async fn run(mut self) -> Result<()> {
        self.audio.start().await?;
        self.wakeword.start();
        self.fsm.start();
        info!("main loop started, listening for wake word");

        let cancel = self.cancel.clone();
        loop {
            let step = tokio::select! {
                () = cancel.cancelled() => Step::Shutdown,
                signal = self.control_rx.recv() => match signal {
                    Some(signal) => Step::Control(signal),
                    None => Step::Shutdown,
                },
                frame = self.audio.read_frame() => Step::Frame(frame),
            };

            match step {
                Step::Shutdown => break,
                Step::Control(ControlSignal::ListenTimeout) => self.on_listen_timeout().await,
                Step::Frame(Some(frame)) => self.on_frame(frame).await,
                Step::Frame(None) => tokio::time::sleep(IDLE_POLL).await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Route one frame according to the current state.
    async fn on_frame(&mut self, frame: AudioFrame) {
        match self.fsm.state() {
            State::Idle => {
                if let Some(detection) = self.wakeword.feed_frame(&frame.samples) {
                    self.handle_event(Event::WakewordDetected {
                        keyword: detection.keyword,
                        score: detection.score,
                    })
                    .await;
                }
            }
            State::Listening => {
                self.stt.feed_frame(&frame.samples);

                if let Some(vad) = self.vad.as_mut() {
                    let speaking = vad.is_speech(&frame.samples);
                    let started = speaking && !self.was_speaking;
                    let ended = self.was_speaking && !speaking;
                    self.was_speaking = speaking;

                    if started {
                        self.router.dispatch(Event::SpeechStart).await;
                    }
                    if ended {
                        info!("silence detected, stopping STT stream");
                        self.router.dispatch(Event::SpeechEnd).await;
                        self.finalize_utterance().await;
                    }
                }
            }
            // Consume and discard to keep the queue drained.
            State::Thinking | State::Speaking | State::Error => {}
        }
    }

    /// Apply the FSM transition, dispatch through the router, then run
    /// the built-in turn lifecycle action for the event.
    async fn handle_event(&mut self, event: Event) {
        self.fsm.handle_event(&self.router, &event).await;

        match event {
            Event::WakewordDetected { .. } => self.on_wakeword().await,
            Event::TranscriptionFinal { text } => self.run_llm_turn(text).await,
            Event::Timeout => self.cancel_listen_timeout(),
            _ => {}
        }
    }

    /// Wake-word handler: reset transient turn state, arm STT, reset the
    /// VAD and start the fail-safe listening timeout.
    async fn on_wakeword(&mut self) {
        self.metrics.increment("wakeword_detections", &[]);
        if let Some(session) = self.fsm.sessions_mut().current_mut() {
            let correlation_id = session.fresh_correlation_id();
            info!(correlation_id, "wake word handler: starting STT stream");
        }

        self.was_speaking = false;
        self.turn_started_at = Some(Instant::now());
        self.stt.start_stream();
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
        self.restart_listen_timeout();
    }

    /// End the utterance: stop STT and route the result. A transcript
    /// becomes TRANSCRIPTION_FINAL; anything else closes the listening
    /// window through TIMEOUT so the FSM always returns to idle.
    async fn finalize_utterance(&mut self) {
        self.cancel_listen_timeout();
        let stopped_at = Instant::now();

        match self.stt.stop_stream().await {
            Some(text) if !text.is_empty() => {
                self.metrics.record_latency(
                    "stt_latency_ms",
                    stopped_at.elapsed().as_secs_f64() * 1_000.0,
                    &[],
                );
                self.handle_event(Event::TranscriptionFinal { text }).await;
            }
            _ => {
                self.handle_event(Event::Timeout).await;
            }
        }
    }

    /// The fail-safe timer fired while still listening.
    async fn on_listen_timeout(&mut self) {
        if self.fsm.state() != State::Listening {
            return;
        }
        info!(
            timeout_secs = self.config.policies.listen_timeout_secs,
            "fail-safe timeout reached, force-stopping STT"
        );
        self.finalize_utterance().await;
    }

    /// Transcription-final handler: suspend capture, stream the LLM
    /// response to completion, store the turn and return to idle.
    async fn run_llm_turn(&mut self, query: String) {
        // Capture pauses so the queue cannot build up behind inference.
        let capture_was_running = self.audio.is_running();
        self.audio.stop();

        let correlation_id = self
            .fsm
            .sessions()
            .current()
            .map(|s| s.correlation_id().to_owned())
            .unwrap_or_default();
        let span = info_span!("turn", correlation_id = %correlation_id);

        async {
            let history: Vec<(String, String)> = self
                .fsm
                .sessions()
                .history(self.config.llm.max_history_turns)
                .to_vec();
            let turn_started = self.turn_started_at.take();

            info!(query = %query, "starting LLM generation");
            let mut stream = Box::pin(self.llm.generate(&query, &history));
            let mut response = String::new();
            let mut first_token = true;
            let mut failure: Option<AssistantError> = None;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(token) => {
                        if first_token {
                            first_token = false;
                            if let Some(t0) = turn_started {
                                self.metrics.record_latency(
                                    "llm_first_token_ms",
                                    t0.elapsed().as_secs_f64() * 1_000.0,
                                    &[],
                                );
                            }
                            self.router
                                .dispatch(Event::LlmToken {
                                    token: token.clone(),
                                })
                                .await;
                        }
                        response.push_str(&token);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            drop(stream);

            match failure {
                None => {
                    info!(chars = response.len(), "LLM generation complete");
                    self.router
                        .dispatch(Event::LlmComplete {
                            response: response.clone(),
                        })
                        .await;
                    self.fsm.sessions_mut().add_turn(query, response);
                    self.metrics.increment("turns_completed", &[]);
                }
                Some(e) => {
                    error!("error during LLM generation: {e}");
                    // Completion observers still see the partial output;
                    // the turn is not stored.
                    self.router
                        .dispatch(Event::LlmComplete { response })
                        .await;
                }
            }
        }
        .instrument(span)
        .await;

        if capture_was_running {
            if let Err(e) = self.audio.start().await {
                error!("failed to restart audio capture: {e}");
                self.router
                    .dispatch(Event::ErrorOccurred {
                        message: e.to_string(),
                    })
                    .await;
            }
        }

        self.fsm.transition(State::Idle);
        info!("returned to idle, ready for next command");
    }

    fn restart_listen_timeout(&mut self) {
        self.cancel_listen_timeout();
        let timeout = Duration::from_secs_f64(self.config.policies.listen_timeout_secs);
        let tx = self.control_tx.clone();
        self.listen_timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(ControlSignal::ListenTimeout);
        }));
    }

    fn cancel_listen_timeout(&mut self) {
        if let Some(task) = self.listen_timeout.take() {
            task.abort();
        }
    }

    /// Best-effort stop of every engine, then the configured grace pause.
    async fn shutdown(&mut self) {
        info!("shutting down");
        self.llm.cancel();
        self.wakeword.stop();
        self.stt.abort_stream();
        self.audio.stop();
        self.cancel_listen_timeout();
        tokio::time::sleep(Duration::from_millis(self.config.policies.shutdown_grace_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use crate::config::{SttConfig, VadConfig};
    use crate::stt::SttModel;
    use crate::vad::VadModel;
    use crate::wakeword::WakeModel;
    use std::collections::VecDeque;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedWakeModel {
        score: f32,
    }

    impl WakeModel for FixedWakeModel {
        fn predict(&mut self, _frame: &[i16]) -> crate::error::Result<Vec<(String, f32)>> {
            Ok(vec![("hey_jarvis".into(), self.score)])
        }
    }

    struct ScriptedVadModel {
        probs: VecDeque<f32>,
    }

    impl VadModel for ScriptedVadModel {
        fn predict(&mut self, _window: &[f32]) -> crate::error::Result<f32> {
            Ok(self.probs.pop_front().unwrap_or(0.0))
        }
    }

    struct FixedSttModel {
        text: &'static str,
    }

    impl SttModel for FixedSttModel {
        fn transcribe(
            &mut self,
            _samples: &[f32],
            _language: &str,
        ) -> crate::error::Result<Vec<String>> {
            Ok(vec![self.text.to_owned()])
        }
    }

    fn frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0i16; 1280],
            captured_at: Instant::now(),
        }
    }

    fn sse_body(tokens: &[&str]) -> String {
        let mut body = String::new();
        for token in tokens {
            body.push_str(&format!(
                "data: {}\n\n",
                serde_json::json!({ "content": token })
            ));
        }
        body.push_str("data: {\"content\":\"\",\"stop\":true}\n\n");
        body
    }

    async fn coordinator_with_llm(endpoint: String, wake_score: f32) -> Coordinator {
        let mut config = AssistantConfig::default();
        config.llm.endpoint = endpoint;
        // 3 silent windows (96ms) end the utterance.
        config.vad.min_silence_duration_ms = 64;
        config.policies.shutdown_grace_ms = 0;

        let audio = AudioSource::new(config.audio.clone());
        let wakeword = WakewordEngine::with_model(
            config.wakeword.threshold,
            Some(Box::new(FixedWakeModel { score: wake_score })),
        );
        let vad = VadEngine::with_model(
            &VadConfig {
                min_silence_duration_ms: 64,
                ..VadConfig::default()
            },
            Some(Box::new(ScriptedVadModel {
                probs: VecDeque::from(vec![0.9; 5]),
            })),
        );
        let stt = SttEngine::with_model(
            &SttConfig::default(),
            Some(Box::new(FixedSttModel {
                text: "turn on the lights",
            })),
        );
        let llm = LlmClient::new(&config.llm).unwrap();

        let mut coordinator =
            Coordinator::with_engines(config, audio, wakeword, Some(vad), stt, llm);
        coordinator.fsm.start();
        coordinator.wakeword.start();
        coordinator
    }

    #[tokio::test]
    async fn full_turn_reaches_idle_with_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&["Okay", ", done."]), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut coordinator =
            coordinator_with_llm(format!("{}/completion", server.uri()), 0.9).await;

        // IDLE: the wake frame opens the listening window.
        coordinator.on_frame(frame()).await;
        assert_eq!(coordinator.state(), State::Listening);
        assert!(coordinator.stt.is_armed());

        // LISTENING: two speech frames, then silence until the VAD edge
        // completes the utterance and the turn runs to completion.
        for _ in 0..6 {
            coordinator.on_frame(frame()).await;
            if coordinator.state() != State::Listening {
                break;
            }
        }

        assert_eq!(coordinator.state(), State::Idle);
        let history = coordinator.fsm.sessions().history(0);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, "turn on the lights");
        assert_eq!(history[0].1, "Okay, done.");
        assert_eq!(coordinator.metrics().counter("turns_completed", &[]), 1);
        assert_eq!(coordinator.metrics().counter("wakeword_detections", &[]), 1);
        assert!(coordinator.metrics().latencies("stt_latency_ms", &[]).is_some());
    }

    #[tokio::test]
    async fn second_wake_requires_idle() {
        let server = MockServer::start().await;
        let mut coordinator =
            coordinator_with_llm(format!("{}/completion", server.uri()), 0.9).await;

        coordinator.on_frame(frame()).await;
        assert_eq!(coordinator.state(), State::Listening);

        // While LISTENING, wake frames are not routed to the wake-word
        // engine, so the state holds.
        let detections_before = coordinator.metrics().counter("wakeword_detections", &[]);
        coordinator.on_frame(frame()).await;
        assert_eq!(
            coordinator.metrics().counter("wakeword_detections", &[]),
            detections_before
        );
    }

    #[tokio::test]
    async fn below_threshold_score_never_leaves_idle() {
        let server = MockServer::start().await;
        let mut coordinator =
            coordinator_with_llm(format!("{}/completion", server.uri()), 0.1).await;

        for _ in 0..5 {
            coordinator.on_frame(frame()).await;
        }
        assert_eq!(coordinator.state(), State::Idle);
        assert_eq!(coordinator.metrics().counter("wakeword_detections", &[]), 0);
    }

    #[tokio::test]
    async fn empty_utterance_times_out_to_idle() {
        let server = MockServer::start().await;
        let mut coordinator =
            coordinator_with_llm(format!("{}/completion", server.uri()), 0.9).await;

        coordinator.on_frame(frame()).await;
        assert_eq!(coordinator.state(), State::Listening);

        // The fail-safe fires before any audio was buffered: no
        // transcript, so the listening window closes via TIMEOUT.
        coordinator.stt.abort_stream();
        coordinator.on_listen_timeout().await;
        assert_eq!(coordinator.state(), State::Idle);
        assert_eq!(coordinator.fsm.sessions().history(0).len(), 0);
    }

    #[tokio::test]
    async fn llm_failure_forces_idle_without_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut coordinator =
            coordinator_with_llm(format!("{}/completion", server.uri()), 0.9).await;

        coordinator.on_frame(frame()).await;
        for _ in 0..6 {
            coordinator.on_frame(frame()).await;
            if coordinator.state() != State::Listening {
                break;
            }
        }

        assert_eq!(coordinator.state(), State::Idle);
        assert_eq!(coordinator.fsm.sessions().history(0).len(), 0);
        assert_eq!(coordinator.metrics().counter("turns_completed", &[]), 0);
    }

    #[tokio::test]
    async fn frames_are_discarded_while_thinking() {
        let server = MockServer::start().await;
        let mut coordinator =
            coordinator_with_llm(format!("{}/completion", server.uri()), 0.9).await;
        coordinator.fsm.transition(State::Thinking);

        // Consumed without reaching any engine.
        coordinator.on_frame(frame()).await;
        assert!(!coordinator.stt.is_armed());
        assert_eq!(coordinator.state(), State::Thinking);
    }
}
