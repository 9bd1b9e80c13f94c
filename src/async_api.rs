use crate::{CaptureOptions, Engine, EngineConfig, Error, ReadinessProbe, Result, Viewport};
use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Load(String, Viewport, oneshot::Sender<Result<()>>),
    Probe(oneshot::Sender<Result<ReadinessProbe>>),
    Capture(CaptureOptions, oneshot::Sender<Result<Vec<u8>>>),
    ClosePage(oneshot::Sender<Result<()>>),
    Ping(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async handle to one engine, backed by a dedicated worker thread.
///
/// The worker thread owns the synchronous [`Engine`] and executes commands
/// sent from async tasks, so callers get an async interface without the
/// engine having to be `Send`. Clones share the same worker. Once every
/// clone is dropped the command channel closes, the worker exits and the
/// engine is dropped with it.
#[derive(Clone)]
pub struct EngineInstance {
    id: u64,
    cmd_tx: Sender<Command>,
}

impl fmt::Debug for EngineInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInstance").field("id", &self.id).finish()
    }
}

impl EngineInstance {
    /// Launch an engine of type `E` on a new worker thread.
    pub async fn launch<E: Engine + 'static>(id: u64, config: EngineConfig) -> Result<Self> {
        Self::spawn(id, move || E::new(config)).await
    }

    /// Spawn a worker thread that builds its engine with `factory` and then
    /// serves commands until closed.
    pub async fn spawn<E, F>(id: u64, factory: F) -> Result<Self>
    where
        E: Engine + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name(format!("mapshot-engine-{}", id))
            .spawn(move || {
                // Initialize engine on the worker thread
                let mut engine = match factory() {
                    Ok(e) => e,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };

                let _ = init_tx.send(Ok(()));

                // Command loop
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Load(html, viewport, resp) => {
                            let _ = resp.send(engine.load_document(&html, viewport));
                        }
                        Command::Probe(resp) => {
                            let _ = resp.send(engine.probe_readiness());
                        }
                        Command::Capture(options, resp) => {
                            let _ = resp.send(engine.capture(&options));
                        }
                        Command::ClosePage(resp) => {
                            let _ = resp.send(engine.close_page());
                        }
                        Command::Ping(resp) => {
                            let _ = resp.send(engine.ping());
                        }
                        Command::Close(resp) => {
                            let _ = resp.send(engine.close());
                            return;
                        }
                    }
                }
            })
            .map_err(|e| Error::InitializationError(format!("Failed to spawn engine worker: {}", e)))?;

        // Wait for the worker to report initialization success or failure
        init_rx
            .await
            .map_err(|e| Error::InitializationError(format!("Worker init canceled: {}", e)))??;

        Ok(Self { id, cmd_tx })
    }

    /// Pool-assigned identifier, unique for the life of the process
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn request<T>(
        &self,
        what: &str,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| Error::EngineGone(format!("{} not delivered to engine {}", what, self.id)))?;
        rx.await
            .map_err(|e| Error::EngineGone(format!("{} canceled on engine {}: {}", what, self.id, e)))?
    }

    /// Load a map document into a fresh page
    pub async fn load_document(&self, html: &str, viewport: Viewport) -> Result<()> {
        let html = html.to_string();
        self.request("Load", move |tx| Command::Load(html, viewport, tx)).await
    }

    /// Read the page's readiness signal once
    pub async fn probe_readiness(&self) -> Result<ReadinessProbe> {
        self.request("Probe", Command::Probe).await
    }

    /// Capture the current page
    pub async fn capture(&self, options: CaptureOptions) -> Result<Vec<u8>> {
        self.request("Capture", move |tx| Command::Capture(options, tx)).await
    }

    /// Close the current page but keep the engine
    pub async fn close_page(&self) -> Result<()> {
        self.request("ClosePage", Command::ClosePage).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.request("Ping", Command::Ping).await
    }

    /// Shut the engine down and stop the worker.
    pub async fn close(&self) -> Result<()> {
        self.request("Close", Command::Close).await
    }
}
