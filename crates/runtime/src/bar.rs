use crate::engine::{Engine, Msg};
use crate::options::BarOptions;
use bar_core::{BarError, Module, Result};
use bar_protocol::ClickStream;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A bar under construction: options plus modules, left to right.
pub struct Bar {
    modules: Vec<Arc<dyn Module>>,
    options: BarOptions,
}

impl Bar {
    pub fn new(options: BarOptions) -> Self {
        Self {
            modules: Vec::new(),
            options,
        }
    }

    #[must_use]
    pub fn add(self, module: impl Module) -> Self {
        self.add_shared(Arc::new(module))
    }

    #[must_use]
    pub fn add_shared(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Start the bar, writing the protocol to `output` and reading clicks
    /// from `input`. The bar follows the clock of the calling thread.
    pub fn start<W, R>(self, output: W, input: R) -> BarHandle
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let clicks = tx.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut stream = ClickStream::new(input);
            loop {
                let next = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(click)) => {
                        if clicks.send(Msg::Click(click)).is_err() {
                            break;
                        }
                    }
                    Some(Err(e @ BarError::Io { .. })) => {
                        error!("reading click input failed: {e}");
                        break;
                    }
                    Some(Err(e)) => warn!("ignoring click input: {e}"),
                    None => {
                        debug!("click input closed");
                        break;
                    }
                }
            }
        });

        let engine = Engine::new(self.modules, self.options, output, tx.clone(), rx, cancel.clone());
        let task = tokio::spawn(engine.run());
        BarHandle { tx, cancel, task }
    }

    /// Run on stdout/stdin until SIGINT or SIGTERM, pausing and resuming on
    /// the configured signals.
    pub async fn run(self) -> Result<()> {
        let mut stop = listen(self.options.stop_signal);
        let mut cont = listen(self.options.cont_signal);
        let mut term = signal(SignalKind::terminate())?;

        let mut bar = self.start(tokio::io::stdout(), tokio::io::stdin());
        loop {
            tokio::select! {
                _ = recv(&mut stop) => bar.pause(),
                _ = recv(&mut cont) => bar.resume(),
                _ = term.recv() => break,
                _ = tokio::signal::ctrl_c() => break,
                done = &mut bar.task => return flatten(done),
            }
        }
        info!("termination requested");
        bar.shutdown().await
    }
}

fn listen(signo: i32) -> Option<Signal> {
    match signal(SignalKind::from_raw(signo)) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(signo, "cannot listen for signal: {e}");
            None
        }
    }
}

async fn recv(signal: &mut Option<Signal>) {
    match signal {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| BarError::Module(format!("bar loop failed: {e}")))?
}

/// Control of a running bar.
pub struct BarHandle {
    tx: mpsc::UnboundedSender<Msg>,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl BarHandle {
    /// Stop writing lines and pause every scheduler on the bar's clock.
    pub fn pause(&self) {
        let _ = self.tx.send(Msg::Pause);
    }

    /// Resume schedulers and rewrite the full line.
    pub fn resume(&self) {
        let _ = self.tx.send(Msg::Resume);
    }

    /// Stop every module, write the last line and close the status array.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        flatten(self.task.await)
    }

    /// Wait for the bar to end on its own (e.g. the output went away).
    pub async fn wait(self) -> Result<()> {
        flatten(self.task.await)
    }
}
