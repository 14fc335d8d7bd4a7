use chrono::NaiveDate;
use rollcall_core::ledger::Ledger;
use rollcall_core::pipeline::PipelineStats;
use rollcall_core::{FaceEmbedder, FrameOutput, LedgerError, Orchestrator, PipelineError};
use rollcall_hw::{Camera, CameraError};
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Live counters reported by the engine thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub frames: u64,
    pub faces: u64,
    pub records: u64,
}

impl From<PipelineStats> for EngineStatus {
    fn from(s: PipelineStats) -> Self {
        Self {
            frames: s.frames,
            faces: s.faces,
            records: s.records,
        }
    }
}

/// Where and how the engine writes.
pub struct EngineSettings {
    pub ledger_dir: PathBuf,
    /// Day the ledger file belongs to; fixed for the life of the process.
    pub date: NaiveDate,
    pub warmup_frames: usize,
}

/// Messages sent from the async side to the engine thread.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Stop,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Ask the engine to finish the current frame and shut down.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.tx
            .send(EngineRequest::Stop)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Resolves when the engine thread ends, with its final counters.
pub type EngineDone = oneshot::Receiver<Result<EngineStatus, EngineError>>;

/// Spawn the capture/recognition loop on a dedicated OS thread.
///
/// The thread owns the camera, the orchestrator and the ledger. The ledger is
/// opened and closed inside the thread, so it is flushed and released on
/// every exit path: stop request, end of stream, or error.
pub fn spawn_engine<E>(
    camera: Camera,
    orchestrator: Orchestrator<E>,
    settings: EngineSettings,
) -> (EngineHandle, EngineDone)
where
    E: FaceEmbedder + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut orchestrator = orchestrator;
            let mut rx = rx;
            let result = run(&camera, &mut orchestrator, &settings, &mut rx);
            if let Err(e) = &result {
                tracing::error!(error = %e, "engine stopped with error");
            }
            drop(camera);
            tracing::info!("engine thread exiting; camera released");
            let _ = done_tx.send(result);
        })
        .expect("failed to spawn engine thread");

    (EngineHandle { tx }, done_rx)
}

fn run<E: FaceEmbedder>(
    camera: &Camera,
    orchestrator: &mut Orchestrator<E>,
    settings: &EngineSettings,
    rx: &mut mpsc::Receiver<EngineRequest>,
) -> Result<EngineStatus, EngineError> {
    let mut stream = camera.stream()?;
    stream.warm_up(settings.warmup_frames);

    Ledger::scoped(&settings.ledger_dir, settings.date, |ledger| {
        orchestrator.drive(
            &mut stream,
            ledger,
            || chrono::Local::now().naive_local(),
            |output| {
                report(&output);
                serve_requests(rx, output.stats.into())
            },
        )?;
        Ok::<_, EngineError>(())
    })?;

    Ok(orchestrator.stats().into())
}

/// Hand annotations to the display side. There is no window here, so they go to the log.
fn report(output: &FrameOutput<'_>) {
    for a in &output.annotations {
        tracing::debug!(
            seq = output.frame.sequence,
            label = %a.label,
            distance = a.distance,
            top = a.face_box.top,
            right = a.face_box.right,
            bottom = a.face_box.bottom,
            left = a.face_box.left,
            logged = a.logged,
            "face"
        );
    }
}

/// Answer pending requests between frames; break on stop or when every handle is gone.
fn serve_requests(rx: &mut mpsc::Receiver<EngineRequest>, live: EngineStatus) -> ControlFlow<()> {
    loop {
        match rx.try_recv() {
            Ok(EngineRequest::Status { reply }) => {
                let _ = reply.send(live);
            }
            Ok(EngineRequest::Stop) => {
                tracing::info!("stop requested");
                return ControlFlow::Break(());
            }
            Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
            Err(TryRecvError::Disconnected) => return ControlFlow::Break(()),
        }
    }
}
