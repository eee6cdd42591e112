// In: src/context/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Column Batch Context
// ====================================================================================
//
// The context is the shared state machine every codec of a pipeline run operates
// against. It owns exactly two batches and the run's dictionaries:
//
//   [back]  Empty -> Loading (decoder appends rows) -> Loaded
//                                                        |
//                                              flip (back Loaded && front Empty)
//                                                        v
//   [front] Empty <- Unloading (sink drains) <------- Loaded (transforms rewrite)
//
// Memory is therefore bounded to one complete batch plus one batch in progress per
// run, regardless of how fast the source produces bytes. The context is closed
// exactly once; a second close is a no-op.
//
// ====================================================================================

pub mod buffer_state;
pub mod dictionary;
pub mod vector;

use arrow::array::ArrayRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::datatypes::SchemaRef;

pub use buffer_state::{BufferEvent, BufferState};
pub use dictionary::{Dictionary, DictionarySet};
pub use vector::ColumnVector;

use crate::error::BatchlineError;
use crate::types::{compile_schema, ColumnSpec};

/// Counters describing the traffic through one context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub flips: usize,
    pub batches_unloaded: usize,
    pub rows_unloaded: usize,
    /// The largest number of occupied slots ever observed. Never exceeds 2.
    pub max_in_flight: usize,
}

#[derive(Debug, Default)]
struct BackSlot {
    state: BufferState,
    /// Allocated lazily on the first load and reused across batches.
    vectors: Option<Vec<ColumnVector>>,
    rows: usize,
    batch: Option<RecordBatch>,
}

#[derive(Debug, Default)]
struct FrontSlot {
    state: BufferState,
    batch: Option<RecordBatch>,
}

/// The double-buffered columnar batch of one pipeline run.
#[derive(Debug)]
pub struct BatchContext {
    schema: SchemaRef,
    columns: Vec<ColumnSpec>,
    capacity: usize,
    front: FrontSlot,
    back: BackSlot,
    dictionaries: DictionarySet,
    stats: ContextStats,
    closed: bool,
}

impl BatchContext {
    /// Creates a context for `schema` whose text decoders flip every `capacity` rows.
    pub fn new(schema: SchemaRef, capacity: usize) -> Result<Self, BatchlineError> {
        if capacity == 0 {
            return Err(BatchlineError::Config(
                "batch capacity must be greater than zero".to_string(),
            ));
        }
        let columns = compile_schema(&schema)?;
        Ok(Self {
            schema,
            columns,
            capacity,
            front: FrontSlot::default(),
            back: BackSlot::default(),
            dictionaries: DictionarySet::default(),
            stats: ContextStats::default(),
            closed: false,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn front_state(&self) -> BufferState {
        self.front.state
    }

    pub fn back_state(&self) -> BufferState {
        self.back.state
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn dictionaries(&self) -> &DictionarySet {
        &self.dictionaries
    }

    pub fn dictionaries_mut(&mut self) -> &mut DictionarySet {
        &mut self.dictionaries
    }

    /// Number of slots currently holding rows. Bounded by 2 by construction.
    pub fn in_flight(&self) -> usize {
        usize::from(self.front.state.is_occupied())
            + usize::from(self.back.state.is_occupied() && self.back_has_rows())
    }

    fn back_has_rows(&self) -> bool {
        self.back.state != BufferState::Loading || self.back.rows > 0
    }

    fn ensure_open(&self) -> Result<(), BatchlineError> {
        if self.closed {
            return Err(BatchlineError::PreconditionViolation(
                "batch context is already closed".to_string(),
            ));
        }
        Ok(())
    }

    fn observe(&mut self) {
        self.stats.max_in_flight = self.stats.max_in_flight.max(self.in_flight());
    }

    //==================================================================================
    // Back buffer (producer side)
    //==================================================================================

    /// Allocates the column vectors if needed, without starting a load.
    pub fn allocate_vectors(&mut self) -> Result<(), BatchlineError> {
        self.ensure_open()?;
        if self.back.vectors.is_none() {
            let mut next_dict_id = 0;
            let mut vectors = Vec::with_capacity(self.columns.len());
            for column in &self.columns {
                vectors.push(ColumnVector::allocate(
                    &column.column_type,
                    self.capacity,
                    &mut next_dict_id,
                    &mut self.dictionaries,
                )?);
            }
            self.back.vectors = Some(vectors);
        }
        Ok(())
    }

    /// `Empty -> Loading` on the back buffer.
    pub fn begin_load(&mut self) -> Result<(), BatchlineError> {
        self.ensure_open()?;
        self.allocate_vectors()?;
        self.back.state = self.back.state.on(BufferEvent::BeginLoad)?;
        self.back.rows = 0;
        Ok(())
    }

    /// The back vectors together with the dictionaries, for consumers. Back must be `Loading`.
    pub fn loading_parts(
        &mut self,
    ) -> Result<(&mut [ColumnVector], &mut DictionarySet), BatchlineError> {
        if self.back.state != BufferState::Loading {
            return Err(BatchlineError::PreconditionViolation(format!(
                "back buffer is {}, not Loading",
                self.back.state
            )));
        }
        let vectors = self
            .back
            .vectors
            .as_mut()
            .ok_or_else(|| BatchlineError::internal("loading back buffer has no vectors"))?;
        Ok((vectors.as_mut_slice(), &mut self.dictionaries))
    }

    /// Records that one complete row was appended to every back vector.
    pub fn commit_row(&mut self) -> Result<(), BatchlineError> {
        if self.back.state != BufferState::Loading {
            return Err(BatchlineError::PreconditionViolation(format!(
                "row committed while back buffer is {}",
                self.back.state
            )));
        }
        self.back.rows += 1;
        self.observe();
        Ok(())
    }

    pub fn back_rows(&self) -> usize {
        match self.back.state {
            BufferState::Loading => self.back.rows,
            _ => self.back.batch.as_ref().map_or(0, |b| b.num_rows()),
        }
    }

    /// `true` when the loading back buffer has reached the batch capacity.
    pub fn back_is_full(&self) -> bool {
        self.back.state == BufferState::Loading && self.back.rows >= self.capacity
    }

    /// `Loading -> Loaded`: turns the back vectors into a `RecordBatch`.
    pub fn finish_load(&mut self) -> Result<(), BatchlineError> {
        self.ensure_open()?;
        let next = self.back.state.on(BufferEvent::FinishLoad)?;
        let rows = self.back.rows;
        let vectors = self
            .back
            .vectors
            .as_mut()
            .ok_or_else(|| BatchlineError::internal("loading back buffer has no vectors"))?;
        let arrays = vectors
            .iter_mut()
            .map(|v| v.finish(&self.dictionaries))
            .collect::<Result<Vec<ArrayRef>, _>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        let batch = RecordBatch::try_new_with_options(self.schema.clone(), arrays, &options)
            .map_err(|e| BatchlineError::corrupt_arrow("assembling batch", e))?;
        self.back.batch = Some(batch);
        self.back.state = next;
        self.observe();
        Ok(())
    }

    /// Loads a complete batch produced elsewhere (binary decoders, batch sources).
    pub fn load_batch(&mut self, batch: RecordBatch) -> Result<(), BatchlineError> {
        self.ensure_open()?;
        let loading = self.back.state.on(BufferEvent::BeginLoad)?;
        self.back.state = loading.on(BufferEvent::FinishLoad)?;
        self.back.rows = batch.num_rows();
        self.back.batch = Some(batch);
        self.observe();
        Ok(())
    }

    //==================================================================================
    // Flip
    //==================================================================================

    /// `true` when back holds a complete batch and front has been fully unloaded.
    pub fn can_flip(&self) -> bool {
        !self.closed
            && self.back.state == BufferState::Loaded
            && self.front.state == BufferState::Empty
    }

    /// Exchanges the roles of back and front.
    pub fn flip(&mut self) -> Result<(), BatchlineError> {
        self.ensure_open()?;
        if !self.can_flip() {
            return Err(BatchlineError::PreconditionViolation(format!(
                "flip requires back Loaded and front Empty (back {}, front {})",
                self.back.state, self.front.state
            )));
        }
        let back_next = self.back.state.on(BufferEvent::FlipOut)?;
        let front_next = self.front.state.on(BufferEvent::FlipIn)?;
        self.front.batch = self.back.batch.take();
        self.back.state = back_next;
        self.back.rows = 0;
        self.front.state = front_next;
        self.stats.flips += 1;
        log_metric!("event" = "flip", "flips" = self.stats.flips);
        Ok(())
    }

    //==================================================================================
    // Front buffer (consumer side)
    //==================================================================================

    /// `true` when a complete batch is waiting to be consumed.
    pub fn front_ready(&self) -> bool {
        !self.closed && self.front.state == BufferState::Loaded
    }

    /// Rewrites the loaded front batch in place. Used by transform stages.
    pub fn map_front<F>(&mut self, f: F) -> Result<(), BatchlineError>
    where
        F: FnOnce(RecordBatch) -> Result<RecordBatch, BatchlineError>,
    {
        self.ensure_open()?;
        if self.front.state != BufferState::Loaded {
            return Err(BatchlineError::PreconditionViolation(format!(
                "front buffer is {}, not Loaded",
                self.front.state
            )));
        }
        let batch = self
            .front
            .batch
            .take()
            .ok_or_else(|| BatchlineError::internal("loaded front buffer has no batch"))?;
        self.front.batch = Some(f(batch)?);
        Ok(())
    }

    /// `Loaded -> Unloading`: hands the front batch to a consumer.
    pub fn begin_unload(&mut self) -> Result<RecordBatch, BatchlineError> {
        self.ensure_open()?;
        let next = self.front.state.on(BufferEvent::BeginUnload)?;
        let batch = self
            .front
            .batch
            .clone()
            .ok_or_else(|| BatchlineError::internal("loaded front buffer has no batch"))?;
        self.front.state = next;
        Ok(batch)
    }

    /// `Unloading -> Empty`: releases the front batch, signalling upstream for a refill.
    pub fn finish_unload(&mut self) -> Result<(), BatchlineError> {
        self.ensure_open()?;
        self.front.state = self.front.state.on(BufferEvent::FinishUnload)?;
        if let Some(batch) = self.front.batch.take() {
            self.stats.batches_unloaded += 1;
            self.stats.rows_unloaded += batch.num_rows();
        }
        Ok(())
    }

    //==================================================================================
    // Lifecycle
    //==================================================================================

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases every vector, batch and dictionary. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.front = FrontSlot::default();
        self.back = BackSlot::default();
        self.dictionaries.clear();
        log::debug!(
            "batch context closed after {} flips, {} rows unloaded",
            self.stats.flips,
            self.stats.rows_unloaded
        );
        true
    }
}
