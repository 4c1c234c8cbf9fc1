//! Asynchronous conversion scheduling.

use crate::{
    settings::{ConversionSettings, TextureConverter},
    texture::TexturePtr,
};
use anyhow::{Context, Result};
use std::{
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender, TryRecvError},
    },
    thread::{self, JoinHandle},
};
use tephra_vfs::Vfs;

/// A conversion job: re-encode the source file and store the result at the
/// destination path.
#[derive(Clone, Debug)]
pub(crate) struct ConversionRequest {
    pub(crate) source_path: PathBuf,
    pub(crate) dest_path: PathBuf,
    pub(crate) settings: ConversionSettings,
}

/// A conversion job drained from the worker.
#[derive(Debug)]
pub(crate) struct CompletedConversion {
    pub(crate) texture: TexturePtr,
    pub(crate) dest_path: PathBuf,
    pub(crate) success: bool,
}

/// Bridges the texture manager to the conversion worker thread.
///
/// At most one job is in flight at a time, bounding the background resource
/// use; the cache-validity decision was made before submission and is not
/// revisited here. The scheduler holds a strong reference to the entry for
/// the duration of its job, so an entry released by all other owners
/// mid-conversion is destroyed only once its result has been drained.
///
/// Owned and polled by the single thread driving the texture manager.
#[derive(Debug)]
pub(crate) struct ConversionScheduler {
    request_tx: Option<Sender<ConversionRequest>>,
    result_rx: Receiver<bool>,
    in_flight: Option<(TexturePtr, PathBuf)>,
    worker: Option<JoinHandle<()>>,
}

impl ConversionScheduler {
    /// Spawns the conversion worker thread, which reads sources and writes
    /// converted results through the given filesystem.
    pub(crate) fn new(vfs: Arc<dyn Vfs>, converter: Arc<dyn TextureConverter>) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<ConversionRequest>();
        let (result_tx, result_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("texture-conversion".to_string())
            .spawn(move || {
                while let Ok(request) = request_rx.recv() {
                    let success = match run_conversion(vfs.as_ref(), converter.as_ref(), &request) {
                        Ok(()) => true,
                        Err(error) => {
                            log::error!(
                                "Conversion of {} failed: {:#}",
                                request.source_path.display(),
                                error
                            );
                            false
                        }
                    };
                    if result_tx.send(success).is_err() {
                        break;
                    }
                }
            })
            .ok();

        if worker.is_none() {
            log::error!("Could not spawn texture conversion worker thread");
        }

        Self {
            request_tx: Some(request_tx),
            result_rx,
            in_flight: None,
            worker,
        }
    }

    /// Whether a submitted job has not been drained yet.
    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Submits a conversion job for the given entry. Must not be called
    /// while another job is in flight.
    pub(crate) fn submit(&mut self, texture: TexturePtr, request: ConversionRequest) {
        debug_assert!(self.in_flight.is_none());

        let dest_path = request.dest_path.clone();
        if let Some(request_tx) = &self.request_tx {
            // A send failure means the worker is gone; the dangling job is
            // reported as failed by the next poll
            let _ = request_tx.send(request);
        }
        self.in_flight = Some((texture, dest_path));
    }

    /// Drains the completed job if there is one, without blocking.
    pub(crate) fn poll(&mut self) -> Option<CompletedConversion> {
        let success = match self.result_rx.try_recv() {
            Ok(success) => success,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => false,
        };
        self.in_flight
            .take()
            .map(|(texture, dest_path)| CompletedConversion {
                texture,
                dest_path,
                success,
            })
    }
}

impl Drop for ConversionScheduler {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.request_tx = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("Texture conversion worker thread panicked");
        }
    }
}

fn run_conversion(
    vfs: &dyn Vfs,
    converter: &dyn TextureConverter,
    request: &ConversionRequest,
) -> Result<()> {
    let file_name = request
        .source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let source = vfs
        .read(&request.source_path)
        .context("Failed to read source file")?;

    let converted = converter.convert(&file_name, &source, &request.settings)?;

    vfs.write(&request.dest_path, &converted)
        .context("Failed to write loose cache file")
}
