//! Content-addressed result cache
//!
//! Splits a batch request into rows along the leading dimension, keys each
//! row by a SHA-512 over `(name, type, non-batch shape, row bytes)` of all
//! inputs in name-sorted order, and fetches previously computed rows from
//! a keyed-bucket store (one bucket per output name). The adapter is only
//! invoked on the rows missing from some requested output; new rows are
//! persisted by a detached background task after the response goes out.
//!
//! Store failures never fail a request: a read error behaves like an empty
//! cache, a write error is logged and dropped.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::infer::{decode_inputs, resolve_output_names};
use crate::server::AppContext;
use crate::tensor::{ElementType, Tensor, TensorData};
use crate::wire;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use sha2::{Digest, Sha512};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Row key used when a request carries no inputs
const EMPTY_KEY: &[u8] = b".empty";
/// Sentinel bucket key holding the serialized type-shape of the rows
const TYPESHAPE_KEY: &[u8] = b".typeshape";
/// Reassembled outputs above this size fail with `TooLarge`
const TWO_GIGS: u64 = 2 * 1024 * 1024 * 1024;

fn bucket(name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(name)
}

// ---------------------------------------------------------------------------
// Row encoding helpers

fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push(v as u8 | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Encode a row's strings as varint lengths followed by the raw bytes
fn encode_strings(strs: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(strs.len() * 2);
    for s in strs {
        put_uvarint(&mut buf, s.len() as u64);
    }
    for s in strs {
        buf.extend_from_slice(s.as_bytes());
    }
    buf
}

fn decode_strings(mut buf: &[u8], count: usize) -> Result<Vec<String>> {
    let mut lens = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, used) =
            read_uvarint(buf).ok_or_else(|| Error::cache("truncated string-table lengths"))?;
        lens.push(len as usize);
        buf = &buf[used..];
    }
    let mut strs = Vec::with_capacity(count);
    for len in lens {
        if buf.len() < len {
            return Err(Error::cache("truncated string-table payload"));
        }
        let (head, tail) = buf.split_at(len);
        strs.push(
            String::from_utf8(head.to_vec())
                .map_err(|_| Error::cache("string-table payload is not UTF-8"))?,
        );
        buf = tail;
    }
    Ok(strs)
}

// ---------------------------------------------------------------------------
// Type-shape packing

/// Pack `(type, rows_per_chunk, dim1, dim2, …)` as 8-byte LE fields
fn pack_type_shape(tensor: &Tensor, chunks: usize) -> Vec<u8> {
    let dims = tensor.shape().len();
    let mut ts = vec![0u8; (dims + 1) * 8];
    ts[0..8].copy_from_slice(&(tensor.dtype() as u64).to_le_bytes());
    if dims > 0 {
        let rows_per_chunk = tensor.shape()[0] / chunks.max(1) as i64;
        ts[8..16].copy_from_slice(&(rows_per_chunk as u64).to_le_bytes());
        for (i, &dim) in tensor.shape().iter().enumerate().skip(1) {
            ts[(i + 1) * 8..(i + 2) * 8].copy_from_slice(&(dim as u64).to_le_bytes());
        }
    }
    ts
}

fn type_shape_field(ts: &[u8], index: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&ts[index * 8..(index + 1) * 8]);
    u64::from_le_bytes(raw)
}

/// Fixed row byte length implied by a type-shape, or `None` for strings
fn row_data_len(ts: &[u8]) -> Option<usize> {
    let fields = ts.len() / 8;
    let mut elements: u64 = 1;
    for i in 1..fields {
        elements = elements.checked_mul(type_shape_field(ts, i))?;
    }
    let dtype = ElementType::from_u8(type_shape_field(ts, 0) as u8).ok()?;
    let size = dtype.size()?;
    Some(elements as usize * size)
}

// ---------------------------------------------------------------------------
// Row-wise input view

/// One input prepared for row-wise splitting
struct RowSplit<'t> {
    tensor: &'t Tensor,
    name: String,
    /// Bytes (numeric) or strings (string type) per chunk
    dlen: usize,
    rows_per_chunk: i64,
    type_shape: Vec<u8>,
}

impl<'t> RowSplit<'t> {
    fn new(tensor: &'t Tensor, name: impl Into<String>, chunks: usize) -> Self {
        let total = match tensor.data() {
            TensorData::Bytes(b) => b.len(),
            TensorData::Strings(s) => s.len(),
        };
        let chunks = chunks.max(1);
        RowSplit {
            tensor,
            name: name.into(),
            dlen: total / chunks,
            rows_per_chunk: tensor.shape().first().map_or(0, |&d| d / chunks as i64),
            type_shape: pack_type_shape(tensor, chunks),
        }
    }

    /// The raw cacheable payload of one chunk
    fn row_bytes(&self, index: usize) -> Cow<'_, [u8]> {
        match self.tensor.data() {
            TensorData::Bytes(b) => Cow::Borrowed(&b[index * self.dlen..(index + 1) * self.dlen]),
            TensorData::Strings(s) => {
                Cow::Owned(encode_strings(&s[index * self.dlen..(index + 1) * self.dlen]))
            }
        }
    }

    /// A tensor holding exactly the picked chunks, in order
    fn subtensor(&self, picks: &[usize]) -> Result<Tensor> {
        let mut shape = self.tensor.shape().to_vec();
        if let Some(d0) = shape.first_mut() {
            *d0 = self.rows_per_chunk * picks.len() as i64;
        }
        match self.tensor.data() {
            TensorData::Bytes(b) => {
                let mut data = Vec::with_capacity(picks.len() * self.dlen);
                for &i in picks {
                    data.extend_from_slice(&b[i * self.dlen..(i + 1) * self.dlen]);
                }
                Tensor::from_bytes(data, shape, self.tensor.dtype())
            }
            TensorData::Strings(s) => {
                let mut strings = Vec::with_capacity(picks.len() * self.dlen);
                for &i in picks {
                    strings.extend_from_slice(&s[i * self.dlen..(i + 1) * self.dlen]);
                }
                Tensor::from_strings(strings, shape)
            }
        }
    }
}

/// SHA-512 fingerprint of one row across all inputs (name-sorted)
fn row_key(splits: &[RowSplit<'_>], index: usize) -> Vec<u8> {
    if splits.is_empty() {
        return EMPTY_KEY.to_vec();
    }
    let mut hasher = Sha512::new();
    for split in splits {
        hasher.update(split.name.as_bytes());
        hasher.update(&split.type_shape[0..8]);
        // skip the batch dimension
        if split.type_shape.len() > 16 {
            hasher.update(&split.type_shape[16..]);
        }
        hasher.update(split.row_bytes(index).as_ref());
    }
    hasher.finalize().to_vec()
}

/// The row count of a request: the agreed leading dimension, or 1 when the
/// inputs disagree, lack a leading dimension, or ship zero rows
fn row_count(inputs: &[(String, Tensor)]) -> usize {
    if inputs.is_empty() {
        return 1;
    }
    let mut rows: i64 = 0;
    for (_, tensor) in inputs {
        let Some(&first) = tensor.shape().first() else {
            return 1;
        };
        if rows == 0 {
            rows = first;
        }
        if rows != first {
            return 1;
        }
    }
    if rows <= 0 {
        1
    } else {
        rows as usize
    }
}

// ---------------------------------------------------------------------------
// Assembly state

enum RowStore {
    /// Fixed-length rows aliased into one contiguous buffer
    Numeric { dlen: usize, content: Vec<u8> },
    /// Variable-length rows (string tensors), encoded per row
    Strings { rows: Vec<Option<Vec<u8>>> },
}

struct OutputState {
    name: String,
    type_shape: Option<Vec<u8>>,
    store: Option<RowStore>,
    present: Vec<bool>,
    incomplete: bool,
}

impl OutputState {
    fn empty(name: &str, chunks: usize) -> Self {
        OutputState {
            name: name.to_owned(),
            type_shape: None,
            store: None,
            present: vec![false; chunks],
            incomplete: false,
        }
    }

    fn row_payload(&self, row: usize) -> Option<Vec<u8>> {
        match self.store.as_ref()? {
            RowStore::Numeric { dlen, content } => {
                Some(content[row * dlen..(row + 1) * dlen].to_vec())
            }
            RowStore::Strings { rows } => rows[row].clone(),
        }
    }
}

/// Rows produced by one request, ready for the background persist
pub struct WriteBack {
    entries: Vec<WriteEntry>,
}

struct WriteEntry {
    bucket: String,
    type_shape: Vec<u8>,
    rows: Vec<(Vec<u8>, Vec<u8>)>,
}

// ---------------------------------------------------------------------------
// Store

/// The persistent keyed-bucket store behind the result cache
pub struct ResultCache {
    db: Database,
}

impl ResultCache {
    /// Open (or create) the cache database; failure here fails startup
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| Error::CacheOpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(ResultCache { db })
    }

    /// Fetch the cached rows for every requested output under one read
    /// snapshot. Buffers are copied out before the transaction ends.
    fn read_outputs(
        &self,
        keys: &[Vec<u8>],
        names: &[String],
        missing_chunks: &mut [bool],
    ) -> Result<Vec<OutputState>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::cache(e.to_string()))?;
        let chunks = keys.len();
        let mut states = Vec::with_capacity(names.len());
        for name in names {
            let mut state = OutputState::empty(name, chunks);
            let table = match txn.open_table(bucket(name)) {
                Ok(table) => Some(table),
                Err(TableError::TableDoesNotExist(_)) => None,
                Err(e) => return Err(Error::cache(e.to_string())),
            };
            let type_shape = match &table {
                Some(table) => table
                    .get(TYPESHAPE_KEY)
                    .map_err(|e| Error::cache(e.to_string()))?
                    .map(|guard| guard.value().to_vec()),
                None => None,
            };
            let (table, type_shape) = match (table, type_shape) {
                (Some(table), Some(ts)) => (table, ts),
                // an output we have never stored: every row is missing
                _ => {
                    state.incomplete = true;
                    missing_chunks.iter_mut().for_each(|m| *m = true);
                    states.push(state);
                    continue;
                }
            };
            match row_data_len(&type_shape) {
                Some(dlen) => {
                    if dlen as u64 * chunks as u64 > TWO_GIGS {
                        return Err(Error::TooLarge);
                    }
                    let mut content = vec![0u8; dlen * chunks];
                    for (j, key) in keys.iter().enumerate() {
                        match table
                            .get(key.as_slice())
                            .map_err(|e| Error::cache(e.to_string()))?
                        {
                            Some(guard) if guard.value().len() == dlen => {
                                content[j * dlen..(j + 1) * dlen].copy_from_slice(guard.value());
                                state.present[j] = true;
                            }
                            _ => {
                                state.incomplete = true;
                                missing_chunks[j] = true;
                            }
                        }
                    }
                    state.store = Some(RowStore::Numeric { dlen, content });
                }
                None => {
                    let mut rows = vec![None; chunks];
                    for (j, key) in keys.iter().enumerate() {
                        match table
                            .get(key.as_slice())
                            .map_err(|e| Error::cache(e.to_string()))?
                        {
                            Some(guard) => {
                                rows[j] = Some(guard.value().to_vec());
                                state.present[j] = true;
                            }
                            None => {
                                state.incomplete = true;
                                missing_chunks[j] = true;
                            }
                        }
                    }
                    state.store = Some(RowStore::Strings { rows });
                }
            }
            state.type_shape = Some(type_shape);
            states.push(state);
        }
        Ok(states)
    }

    /// Persist newly computed rows and type-shape sentinels. The first
    /// stored type-shape for a bucket wins.
    pub fn write_rows(&self, write_back: &WriteBack) -> Result<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::cache(e.to_string()))?;
        for entry in &write_back.entries {
            let mut table = txn
                .open_table(bucket(&entry.bucket))
                .map_err(|e| Error::cache(e.to_string()))?;
            let has_type_shape = table
                .get(TYPESHAPE_KEY)
                .map_err(|e| Error::cache(e.to_string()))?
                .is_some();
            if !has_type_shape {
                table
                    .insert(TYPESHAPE_KEY, entry.type_shape.as_slice())
                    .map_err(|e| Error::cache(e.to_string()))?;
            }
            for (key, row) in &entry.rows {
                table
                    .insert(key.as_slice(), row.as_slice())
                    .map_err(|e| Error::cache(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| Error::cache(e.to_string()))
    }
}

/// Persist a request's new rows without blocking the response path. A
/// failure is logged and dropped.
pub(crate) fn spawn_write_back(cache: Arc<ResultCache>, write_back: WriteBack) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = cache.write_rows(&write_back) {
            error!("failed to set cache: {e}");
        }
    });
}

// ---------------------------------------------------------------------------
// Pipeline

fn all_missing(names: &[String], chunks: usize, missing_chunks: &mut [bool]) -> Vec<OutputState> {
    missing_chunks.iter_mut().for_each(|m| *m = true);
    names
        .iter()
        .map(|name| {
            let mut state = OutputState::empty(name, chunks);
            state.incomplete = true;
            state
        })
        .collect()
}

/// Splice adapter results into the incomplete output slots
///
/// `results` is positionally aligned with the requested output names; the
/// entries for already-complete outputs are simply ignored. An adapter
/// that returns extra trailing outputs is tolerated, one that returns too
/// few to cover the incomplete slots is not.
fn merge_results(
    states: &mut [OutputState],
    apply_idx: &[usize],
    results: &[Tensor],
    missing: &[usize],
    chunks: usize,
) -> Result<()> {
    let needed = apply_idx.last().map_or(0, |&i| i + 1);
    if results.len() < needed {
        return Err(Error::apply_failed(format!(
            "adapter returned {} outputs where at least {} were required",
            results.len(),
            needed
        )));
    }
    for &slot in apply_idx {
        let result = &results[slot];
        let first = result.shape().first().copied().unwrap_or(1);
        if missing.len() > 1 && first != missing.len() as i64 {
            return Err(Error::apply_failed(format!(
                "adapter returned a batch of {} rows where {} were required",
                first,
                missing.len()
            )));
        }
        let split = RowSplit::new(result, "", missing.len());
        let state = &mut states[slot];
        if state.type_shape.is_none() {
            match row_data_len(&split.type_shape) {
                Some(dlen) => {
                    if dlen as u64 * chunks as u64 > TWO_GIGS {
                        return Err(Error::TooLarge);
                    }
                    state.store = Some(RowStore::Numeric {
                        dlen,
                        content: vec![0u8; dlen * chunks],
                    });
                }
                None => {
                    state.store = Some(RowStore::Strings {
                        rows: vec![None; chunks],
                    });
                }
            }
            state.type_shape = Some(split.type_shape.clone());
        }
        let store = state
            .store
            .as_mut()
            .ok_or_else(|| Error::cache("output state lost its row store"))?;
        for (j, &row) in missing.iter().enumerate() {
            match store {
                RowStore::Numeric { dlen, content } => {
                    let src = split.row_bytes(j);
                    if src.len() != *dlen {
                        return Err(Error::apply_failed(
                            "adapter output row size disagrees with the cached type-shape",
                        ));
                    }
                    content[row * *dlen..(row + 1) * *dlen].copy_from_slice(&src);
                }
                RowStore::Strings { rows } => {
                    rows[row] = Some(split.row_bytes(j).into_owned());
                }
            }
            state.present[row] = true;
        }
    }
    Ok(())
}

fn build_write_back(
    states: &[OutputState],
    keys: &[Vec<u8>],
    missing: &[usize],
) -> Result<WriteBack> {
    let mut entries = Vec::with_capacity(states.len());
    for state in states {
        let type_shape = state
            .type_shape
            .clone()
            .ok_or_else(|| Error::cache("output has no type-shape to persist"))?;
        let mut rows = Vec::with_capacity(missing.len());
        for &row in missing {
            let payload = state
                .row_payload(row)
                .ok_or_else(|| Error::cache("computed row is absent from the assembly"))?;
            rows.push((keys[row].clone(), payload));
        }
        entries.push(WriteEntry {
            bucket: state.name.clone(),
            type_shape,
            rows,
        });
    }
    Ok(WriteBack { entries })
}

/// Reconstruct one output tensor from its type-shape and assembled rows
fn assemble(state: OutputState, chunks: usize) -> Result<Tensor> {
    let unassembled =
        || Error::apply_failed(format!("output '{}' could not be assembled", state.name));
    let type_shape = state.type_shape.as_ref().ok_or_else(unassembled)?;
    let dtype = ElementType::from_u8(type_shape_field(type_shape, 0) as u8)?;
    let fields = type_shape.len() / 8;
    let mut shape: Vec<i64> = (1..fields)
        .map(|i| type_shape_field(type_shape, i) as i64)
        .collect();
    let rows_per_chunk = shape.first().copied().unwrap_or(0);
    if let Some(d0) = shape.first_mut() {
        *d0 = rows_per_chunk * chunks as i64;
    }
    if !state.present.iter().all(|&p| p) {
        return Err(unassembled());
    }
    match state.store {
        Some(RowStore::Numeric { content, .. }) => {
            if content.len() as u64 > TWO_GIGS {
                return Err(Error::TooLarge);
            }
            Tensor::from_bytes(content, shape, dtype)
        }
        Some(RowStore::Strings { rows }) => {
            // strings per chunk span the trailing dimensions too
            let elems_per_chunk: u64 = (1..fields).map(|i| type_shape_field(type_shape, i)).product();
            let mut strings = Vec::new();
            for row in rows {
                let buf = row.ok_or_else(unassembled)?;
                strings.extend(decode_strings(&buf, elems_per_chunk as usize)?);
            }
            Tensor::from_strings(strings, shape)
        }
        None => Err(unassembled()),
    }
}

/// The cached inference pipeline
///
/// Returns the assembled outputs plus, when the adapter ran, the rows to
/// persist in the background.
pub(crate) fn get_results_cached(
    app: &AppContext,
    cache: &ResultCache,
    ctx: &mut RequestContext,
    req: &wire::InferRequest<'_>,
) -> Result<(Vec<Tensor>, Option<WriteBack>)> {
    let inputs = decode_inputs(app, req)?;
    let chunks = row_count(&inputs);
    debug!("request divides into {chunks} chunks");

    let mut splits: Vec<RowSplit<'_>> = inputs
        .iter()
        .map(|(name, tensor)| RowSplit::new(tensor, name.as_str(), chunks))
        .collect();
    splits.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let keys: Vec<Vec<u8>> = (0..chunks).map(|i| row_key(&splits, i)).collect();
    let output_names = resolve_output_names(app, req)?;

    let mut missing_chunks = vec![false; chunks];
    let mut states = match cache.read_outputs(&keys, &output_names, &mut missing_chunks) {
        Ok(states) => states,
        Err(Error::Cache(e)) => {
            error!("failed to get cached data, treating cache as empty: {e}");
            all_missing(&output_names, chunks, &mut missing_chunks)
        }
        Err(e) => return Err(e),
    };

    let missing: Vec<usize> = (0..chunks).filter(|&i| missing_chunks[i]).collect();
    let apply_idx: Vec<usize> = (0..states.len())
        .filter(|&i| states[i].incomplete)
        .collect();

    let mut write_back = None;
    if missing.is_empty() {
        info!("skipping apply because everything is cached");
    } else if apply_idx.is_empty() {
        info!("skipping apply because no requested output is incomplete");
    } else {
        debug!("{} of {chunks} rows must be computed", missing.len());
        let reduced: HashMap<String, Tensor> = splits
            .iter()
            .map(|split| Ok((split.name.clone(), split.subtensor(&missing)?)))
            .collect::<Result<_>>()?;
        let results = (app.apply)(ctx, req.config().unwrap_or_default(), reduced, &output_names)?;
        merge_results(&mut states, &apply_idx, &results, &missing, chunks)?;
        write_back = Some(build_write_back(&states, &keys, &missing)?);
    }

    let outputs: Vec<Tensor> = states
        .into_iter()
        .map(|state| assemble(state, chunks))
        .collect::<Result<_>>()?;
    Ok((outputs, write_back))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{build_simple_apply, Applier};
    use crate::metadata::Metadata;
    use crate::value::{from_value, to_value};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_uvarint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, 1 << 20, u64::MAX] {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, v);
            assert_eq!(read_uvarint(&buf), Some((v, buf.len())));
        }
    }

    #[test]
    fn test_string_table_round_trip() {
        let strs = vec!["foo".to_string(), "".to_string(), "a longer entry".to_string()];
        let buf = encode_strings(&strs);
        assert_eq!(decode_strings(&buf, 3).unwrap(), strs);
    }

    fn splits_for(tensors: &[(&str, &Tensor)], chunks: usize) -> Vec<Vec<u8>> {
        let mut splits: Vec<RowSplit<'_>> = tensors
            .iter()
            .map(|(name, t)| RowSplit::new(t, *name, chunks))
            .collect();
        splits.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        (0..chunks).map(|i| row_key(&splits, i)).collect()
    }

    #[test]
    fn test_row_key_ignores_batch_dimension() {
        let two = from_value(&vec![vec![1.0f32, 2.0], vec![3.0, 4.0]]).unwrap();
        let three = from_value(&vec![vec![1.0f32, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let keys2 = splits_for(&[("input0", &two)], 2);
        let keys3 = splits_for(&[("input0", &three)], 3);
        assert_eq!(keys2[0], keys3[0]);
        assert_eq!(keys2[1], keys3[1]);
        assert_ne!(keys3[0], keys3[2]);
    }

    #[test]
    fn test_row_key_depends_on_contents_and_trailing_shape() {
        let base = from_value(&vec![vec![1.0f32, 2.0]]).unwrap();
        let changed = from_value(&vec![vec![1.0f32, 2.5]]).unwrap();
        let reshaped = from_value(&vec![vec![vec![1.0f32], vec![2.0]]]).unwrap();
        let renamed_keys = splits_for(&[("other", &base)], 1);
        let base_keys = splits_for(&[("input0", &base)], 1);
        assert_ne!(base_keys[0], splits_for(&[("input0", &changed)], 1)[0]);
        assert_ne!(base_keys[0], splits_for(&[("input0", &reshaped)], 1)[0]);
        assert_ne!(base_keys[0], renamed_keys[0]);
    }

    #[test]
    fn test_empty_request_key() {
        assert_eq!(row_key(&[], 0), EMPTY_KEY.to_vec());
    }

    #[test]
    fn test_row_count_rules() {
        let a = from_value(&vec![vec![1.0f32], vec![2.0]]).unwrap();
        let b = from_value(&vec![vec![9.0f32], vec![8.0]]).unwrap();
        let c = from_value(&vec![1.0f32, 2.0, 3.0]).unwrap();
        let pair = |x: &Tensor, y: &Tensor| {
            vec![
                ("input0".to_string(), x.clone()),
                ("input1".to_string(), y.clone()),
            ]
        };
        assert_eq!(row_count(&[]), 1);
        assert_eq!(row_count(&pair(&a, &b)), 2);
        // disagreeing first dimensions collapse to a single row
        assert_eq!(row_count(&pair(&a, &c)), 1);
        let empty = from_value(&(Vec::<Vec<f32>>::new())).unwrap();
        assert_eq!(row_count(&[("input0".to_string(), empty)]), 1);
    }

    // -- pipeline harness ---------------------------------------------------

    struct Harness {
        app: AppContext,
        cache: Arc<ResultCache>,
        calls: Arc<AtomicUsize>,
        rows_seen: Arc<AtomicUsize>,
        _dir: TempDir,
    }

    /// An identity adapter that counts invocations and the rows it computes
    fn counting_identity(calls: Arc<AtomicUsize>, rows_seen: Arc<AtomicUsize>) -> Applier {
        Arc::new(move |_ctx, _config, inputs, _outputs| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut names: Vec<&String> = inputs.keys().collect();
            names.sort();
            let out: Vec<Tensor> = names
                .iter()
                .map(|name| inputs[name.as_str()].clone())
                .collect();
            if let Some(first) = out.first() {
                rows_seen.fetch_add(
                    first.shape().first().copied().unwrap_or(0) as usize,
                    Ordering::SeqCst,
                );
            }
            Ok(out)
        })
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ResultCache::open(dir.path().join("cache.db")).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let rows_seen = Arc::new(AtomicUsize::new(0));
        let app = AppContext {
            meta: Metadata::default(),
            apply: counting_identity(calls.clone(), rows_seen.clone()),
            get_handler: None,
            rest_apply: None,
            default_inputs: vec!["input0".to_string()],
            default_outputs: vec!["output0".to_string()],
            cache: Some(cache.clone()),
            is_ready: AtomicI64::new(1),
            is_alive: AtomicI64::new(1),
        };
        Harness {
            app,
            cache,
            calls,
            rows_seen,
            _dir: dir,
        }
    }

    /// A fixed two-output typed-shim adapter (echo and double), with an
    /// invocation counter wrapped around the generated applier
    fn typed_two_output_harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ResultCache::open(dir.path().join("cache.db")).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let rows_seen = Arc::new(AtomicUsize::new(0));
        let opts = build_simple_apply(
            |_ctx: &mut RequestContext, _cfg: String, (x,): (Vec<Vec<f32>>,)| {
                let doubled: Vec<Vec<f32>> = x
                    .iter()
                    .map(|row| row.iter().map(|v| v * 2.0).collect())
                    .collect();
                Ok((x, doubled))
            },
            None,
            None,
        );
        let inner = opts.apply.clone();
        let counter = calls.clone();
        let apply: Applier = Arc::new(move |ctx, config, inputs, output_names| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner(ctx, config, inputs, output_names)
        });
        let app = AppContext {
            meta: opts.meta,
            apply,
            get_handler: None,
            rest_apply: None,
            default_inputs: opts.default_inputs,
            default_outputs: opts.default_outputs,
            cache: Some(cache.clone()),
            is_ready: AtomicI64::new(1),
            is_alive: AtomicI64::new(1),
        };
        Harness {
            app,
            cache,
            calls,
            rows_seen,
            _dir: dir,
        }
    }

    /// Run one request through the cached pipeline, completing the
    /// write-back synchronously so the next request sees it.
    fn run_with_outputs(h: &Harness, tensor: &Tensor, output_names: &[String]) -> Vec<Tensor> {
        let bytes = crate::client::encode_infer_request("", &[tensor.clone()], &[], output_names);
        let root = wire::root_as_request(&bytes).unwrap();
        let req = root.req_as_infer_request().unwrap();
        let mut ctx = RequestContext::detached();
        let (outputs, write_back) =
            get_results_cached(&h.app, &h.cache, &mut ctx, &req).unwrap();
        if let Some(wb) = write_back {
            h.cache.write_rows(&wb).unwrap();
        }
        outputs
    }

    fn run(h: &Harness, tensor: &Tensor) -> Vec<Tensor> {
        run_with_outputs(h, tensor, &[])
    }

    #[test]
    fn test_second_identical_request_skips_apply() {
        let h = harness();
        let t = from_value(&vec![vec![1.0f32, 2.0], vec![3.0, 4.0]]).unwrap();
        let first = run(&h, &t);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        let second = run(&h, &t);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1, "everything was cached");
        assert_eq!(first, second);
        assert_eq!(first, vec![t]);
    }

    #[test]
    fn test_only_new_rows_are_computed() {
        let h = harness();
        let first = from_value(&vec![vec![1.0f32, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]).unwrap();
        run(&h, &first);
        assert_eq!(h.rows_seen.load(Ordering::SeqCst), 2);

        let second =
            from_value(&vec![vec![5.0f32, 6.0, 7.0, 8.0], vec![9.0, 10.0, 11.0, 12.0]]).unwrap();
        let out = run(&h, &second);
        // only the genuinely new row reached the adapter
        assert_eq!(h.rows_seen.load(Ordering::SeqCst), 3);
        assert_eq!(out, vec![second]);
    }

    #[test]
    fn test_interleaved_rows_reassemble_in_order() {
        let h = harness();
        let row = |v: f32| vec![v, v + 1.0];
        let rb = from_value(&vec![row(10.0)]).unwrap();
        run(&h, &rb);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let concat = from_value(&vec![row(0.0), row(10.0), row(20.0)]).unwrap();
        let out = run(&h, &concat);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        // two new rows on the second call
        assert_eq!(h.rows_seen.load(Ordering::SeqCst), 3);
        assert_eq!(out, vec![concat]);
    }

    #[test]
    fn test_permuted_subset_hits_without_apply() {
        let h = harness();
        let all = from_value(&vec![vec![1.0f32], vec![2.0], vec![3.0]]).unwrap();
        run(&h, &all);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let permuted = from_value(&vec![vec![3.0f32], vec![1.0]]).unwrap();
        let out = run(&h, &permuted);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1, "apply must not run");
        assert_eq!(out, vec![permuted]);
    }

    #[test]
    fn test_string_rows_round_trip_through_cache() {
        let h = harness();
        let t = from_value(&vec!["foo".to_string(), "bar".to_string()]).unwrap();
        let first = run(&h, &t);
        assert_eq!(first, vec![t.clone()]);
        let second = run(&h, &t);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second, vec![t]);
    }

    #[test]
    fn test_multidim_string_rows_keep_trailing_elements() {
        let h = harness();
        let t = from_value(&vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "d".to_string()],
        ])
        .unwrap();
        let first = run(&h, &t);
        assert_eq!(first, vec![t.clone()]);
        let second = run(&h, &t);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second, vec![t]);
    }

    #[test]
    fn test_string_subset_reuses_rows() {
        let h = harness();
        let all = from_value(&vec!["a".to_string(), "b".to_string(), "c".to_string()]).unwrap();
        run(&h, &all);
        let subset = from_value(&vec!["c".to_string(), "a".to_string()]).unwrap();
        let out = run(&h, &subset);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out, vec![subset]);
    }

    #[test]
    fn test_disagreeing_dims_fall_back_to_single_row() {
        let h = harness();
        let a = from_value(&vec![vec![1.0f32], vec![2.0]]).unwrap();
        let b = from_value(&vec![9.0f32, 8.0, 7.0]).unwrap();
        let bytes = crate::client::encode_infer_request(
            "",
            &[a, b],
            &["input0".to_string(), "input1".to_string()],
            &["output0".to_string(), "output1".to_string()],
        );
        let root = wire::root_as_request(&bytes).unwrap();
        let req = root.req_as_infer_request().unwrap();
        let mut ctx = RequestContext::detached();
        let (outputs, wb) = get_results_cached(&h.app, &h.cache, &mut ctx, &req).unwrap();
        h.cache.write_rows(&wb.unwrap()).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].shape(), &[2, 1]);
        assert_eq!(outputs[1].shape(), &[3]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_rows_request() {
        let h = harness();
        let empty = from_value(&(Vec::<Vec<f32>>::new())).unwrap();
        let out = run(&h, &empty);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].shape().first(), Some(&0));
    }

    #[test]
    fn test_subset_output_request_on_multi_output_model() {
        let h = typed_two_output_harness();
        let t = from_value(&vec![vec![1.0f32, 2.0], vec![3.0, 4.0]]).unwrap();

        // cold cache, asking for only the first of two fixed outputs
        let out = run_with_outputs(&h, &t, &["output0".to_string()]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out, vec![t.clone()]);

        // the same subset request is then served entirely from cache
        let again = run_with_outputs(&h, &t, &["output0".to_string()]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(again, vec![t]);
    }

    #[test]
    fn test_partially_cached_outputs_splice_by_position() {
        let h = typed_two_output_harness();
        let x = vec![vec![1.0f32, 2.0], vec![3.0, 4.0]];
        let t = from_value(&x).unwrap();
        run_with_outputs(&h, &t, &["output0".to_string()]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        // output0 is fully cached, output1 has no bucket yet: the adapter
        // runs once more and only output1's result is spliced in
        let both = ["output0".to_string(), "output1".to_string()];
        let out = run_with_outputs(&h, &t, &both);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        let doubled: Vec<Vec<f32>> = x
            .iter()
            .map(|row| row.iter().map(|v| v * 2.0).collect())
            .collect();
        assert_eq!(out[0], t);
        assert_eq!(out[1], from_value(&doubled).unwrap());

        // with both buckets filled nothing recomputes
        let again = run_with_outputs(&h, &t, &both);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(again, out);
    }

    #[test]
    fn test_outputs_are_byte_identical_across_runs() {
        let h = harness();
        let t = from_value(&vec![vec![0.5f32, -0.5], vec![1.5, -1.5]]).unwrap();
        let first = run(&h, &t);
        let second = run(&h, &t);
        assert_eq!(first[0].bytes(), second[0].bytes());
        assert_eq!(first[0].shape(), second[0].shape());
    }
}
