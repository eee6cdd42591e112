// In: src/pipeline/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Pipeline Orchestrator
// ====================================================================================
//
// A pipeline run is one linear chain driven serially on the caller's thread:
//
//   ByteSource -> Decoder --\
//                            >-- BatchContext (back -> flip -> front)
//   BatchSource ------------/            |
//                                        v
//                         Stage* (rewrite front in place) -> Sink
//
// Flow control is pull-based. The producer side only hands a batch on after the
// sink reported `ready()`; until then it parks its input and the orchestrator keeps
// polling `resume`. Nothing downstream of the context keeps batches of its own, so a
// run never holds more than the context's two slots.
//
// Failure: the first error stops the source, every participant that was started and
// has not had its terminal call yet receives `on_error` once, then every participant
// is closed once. `execute` resolves to that error. A participant whose `on_complete`
// was called never sees `on_error`, even when that call failed.
//
// ====================================================================================

pub mod adapters;
pub mod traits;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;

pub use adapters::{
    ChunkedByteSource, CollectingSink, EncoderSink, MapStage, ReaderByteSource, SharedVecSink,
    VecBatchSource, WriterByteSink,
};
pub use traits::{BatchReceiver, BatchSource, ByteSink, ByteSource, Sink, Stage};

use crate::codecs::ipc::{conform, drain_batches, pump_batches};
use crate::codecs::{same_columns, Decoder};
use crate::config::EngineConfig;
use crate::context::BatchContext;
use crate::error::BatchlineError;

const SOURCE_STAGE: &str = "source";
const BATCH_SOURCE: &str = "batch-source";

/// What a completed run moved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub chunks_read: usize,
    pub batches: usize,
    pub rows: usize,
    pub flips: usize,
    /// Never exceeds 2.
    pub max_in_flight: usize,
}

/// Stops a run from anywhere, including another thread.
///
/// The handle is armed when created: dropping it cancels the run unless it was
/// [`disarm`](CancelHandle::disarm)ed first.
#[derive(Debug)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Lets the handle go without cancelling the run.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if self.armed {
            self.cancel();
        }
    }
}

fn check_cancelled(flag: &AtomicBool) -> Result<(), BatchlineError> {
    if flag.load(Ordering::Acquire) {
        Err(BatchlineError::Cancelled)
    } else {
        Ok(())
    }
}

enum Input {
    Bytes {
        source: Box<dyn ByteSource>,
        decoder: Box<dyn Decoder>,
    },
    Batches {
        source: Box<dyn BatchSource>,
    },
}

/// Participants that were started and still owe a terminal call.
#[derive(Debug, Default)]
struct Live {
    decoder: bool,
    stages: Vec<bool>,
    sink: bool,
}

/// The stages plus the sink, seen by the producer as one receiver.
struct Chain<'a> {
    stages: &'a mut [Box<dyn Stage>],
    sink: &'a mut dyn Sink,
    cancel: &'a AtomicBool,
}

impl BatchReceiver for Chain<'_> {
    fn ready(&mut self) -> bool {
        // A cancelled chain accepts the next delivery so it can fail it.
        self.cancel.load(Ordering::Acquire) || self.sink.ready()
    }

    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        check_cancelled(self.cancel)?;
        for stage in self.stages.iter_mut() {
            let result = ctx.map_front(|batch| stage.on_batch(batch));
            result.map_err(|e| e.at_stage(stage.name()))?;
        }
        self.sink
            .on_batch(ctx)
            .map_err(|e| e.at_stage(self.sink.name()))
    }
}

pub struct Pipeline {
    schema: SchemaRef,
    config: EngineConfig,
    input: Input,
    stages: Vec<Box<dyn Stage>>,
    sink: Option<Box<dyn Sink>>,
    cancel: Arc<AtomicBool>,
    live: Live,
    closed: bool,
}

impl Pipeline {
    /// A run that decodes `source` with `decoder` into batches of `schema`.
    pub fn from_bytes(
        source: Box<dyn ByteSource>,
        decoder: Box<dyn Decoder>,
        schema: SchemaRef,
        config: &EngineConfig,
    ) -> Result<Self, BatchlineError> {
        config.codec.validate()?;
        if !same_columns(&decoder.schema(), &schema) {
            return Err(BatchlineError::PreconditionViolation(format!(
                "{} decoder is bound to a different schema than the pipeline",
                decoder.name()
            )));
        }
        Ok(Self::new(schema, config, Input::Bytes { source, decoder }))
    }

    /// A run over batches that already exist.
    pub fn from_batches(
        source: Box<dyn BatchSource>,
        config: &EngineConfig,
    ) -> Result<Self, BatchlineError> {
        config.codec.validate()?;
        let schema = source.schema();
        Ok(Self::new(schema, config, Input::Batches { source }))
    }

    fn new(schema: SchemaRef, config: &EngineConfig, input: Input) -> Self {
        Self {
            schema,
            config: config.clone(),
            input,
            stages: Vec::new(),
            sink: None,
            cancel: Arc::new(AtomicBool::new(false)),
            live: Live::default(),
            closed: false,
        }
    }

    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Terminates the chain. A second sink replaces the first, which is closed.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) -> &mut Self {
        if let Some(mut previous) = self.sink.replace(sink) {
            log::warn!("pipeline sink '{}' replaced before execution", previous.name());
            previous.close();
        }
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
            armed: true,
        }
    }

    /// Runs the chain to completion on the current thread.
    pub fn execute(mut self) -> Result<PipelineSummary, BatchlineError> {
        if self.sink.is_none() {
            return Err(BatchlineError::PreconditionViolation(
                "pipeline executed without a sink".to_string(),
            ));
        }
        let mut ctx = BatchContext::new(self.schema.clone(), self.config.codec.batch_capacity)?;
        log::debug!(
            "pipeline started: {} stages, batch capacity {}",
            self.stages.len(),
            ctx.capacity()
        );
        let result = self.run(&mut ctx);
        if let Err(e) = &result {
            log::debug!("pipeline failed: {}", e);
            self.fail(e);
        }
        self.close_all();
        let stats = ctx.stats();
        ctx.close();
        let chunks_read = result?;
        let summary = PipelineSummary {
            chunks_read,
            batches: stats.batches_unloaded,
            rows: stats.rows_unloaded,
            flips: stats.flips,
            max_in_flight: stats.max_in_flight,
        };
        log::debug!("pipeline completed: {:?}", summary);
        Ok(summary)
    }

    /// Drives the run and returns the number of chunks read.
    fn run(&mut self, ctx: &mut BatchContext) -> Result<usize, BatchlineError> {
        let Self {
            schema,
            config,
            input,
            stages,
            sink,
            cancel,
            live,
            ..
        } = self;
        let cancel: &AtomicBool = &**cancel;
        let sink = sink
            .as_mut()
            .ok_or_else(|| BatchlineError::internal("pipeline lost its sink"))?;
        check_cancelled(cancel)?;

        live.stages = vec![false; stages.len()];
        let mut current = schema.clone();
        for (stage, started) in stages.iter_mut().zip(live.stages.iter_mut()) {
            *started = true;
            current = stage
                .on_start(current)
                .map_err(|e| e.at_stage(stage.name()))?;
        }
        live.sink = true;
        sink.on_start(current).map_err(|e| e.at_stage(sink.name()))?;

        let mut chunks_read = 0;
        {
            let mut chain = Chain {
                stages: stages.as_mut_slice(),
                sink: &mut **sink,
                cancel,
            };
            match input {
                Input::Bytes { source, decoder } => {
                    live.decoder = true;
                    decoder
                        .on_start(ctx)
                        .map_err(|e| e.at_stage(decoder.name()))?;
                    let interval = config.cancel_check_interval;
                    loop {
                        if interval == 0 || chunks_read % interval == 0 {
                            check_cancelled(cancel)?;
                        }
                        let chunk = source
                            .next_chunk()
                            .map_err(|e| e.at_stage(SOURCE_STAGE))?;
                        let Some(chunk) = chunk else { break };
                        chunks_read += 1;
                        decoder
                            .on_next(ctx, &chunk, &mut chain)
                            .map_err(|e| e.at_stage(decoder.name()))?;
                        while !decoder
                            .resume(ctx, &mut chain)
                            .map_err(|e| e.at_stage(decoder.name()))?
                        {
                            check_cancelled(cancel)?;
                        }
                    }
                    check_cancelled(cancel)?;
                    live.decoder = false;
                    decoder
                        .on_complete(ctx, &mut chain)
                        .map_err(|e| e.at_stage(decoder.name()))?;
                }
                Input::Batches { source } => {
                    let target = schema.clone();
                    let mut next = || {
                        check_cancelled(cancel)?;
                        match source.next_batch().map_err(|e| e.at_stage(SOURCE_STAGE))? {
                            Some(batch) => conform(BATCH_SOURCE, &target, batch).map(Some),
                            None => Ok(None),
                        }
                    };
                    while !pump_batches(BATCH_SOURCE, ctx, &mut chain, &mut next)
                        .map_err(|e| e.at_stage(BATCH_SOURCE))?
                    {
                        check_cancelled(cancel)?;
                    }
                    drain_batches(BATCH_SOURCE, ctx, &mut chain)
                        .map_err(|e| e.at_stage(BATCH_SOURCE))?;
                }
            }
        }

        for (stage, started) in stages.iter_mut().zip(live.stages.iter_mut()) {
            *started = false;
            stage.on_complete().map_err(|e| e.at_stage(stage.name()))?;
        }
        live.sink = false;
        sink.on_complete().map_err(|e| e.at_stage(sink.name()))?;
        Ok(chunks_read)
    }

    /// Stops the source and tells every live participant about `error`, once each.
    fn fail(&mut self, error: &BatchlineError) {
        let live = std::mem::take(&mut self.live);
        match &mut self.input {
            Input::Bytes { source, decoder } => {
                source.stop();
                if live.decoder {
                    decoder.on_error(error);
                }
            }
            Input::Batches { source } => source.stop(),
        }
        for (stage, started) in self.stages.iter_mut().zip(live.stages) {
            if started {
                stage.on_error(error);
            }
        }
        if live.sink {
            if let Some(sink) = self.sink.as_mut() {
                sink.on_error(error);
            }
        }
    }

    fn close_all(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Input::Bytes { decoder, .. } = &mut self.input {
            decoder.close();
        }
        for stage in self.stages.iter_mut() {
            stage.close();
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.close();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close_all();
    }
}
