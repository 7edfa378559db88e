//! Projection of block voxels into run-length-encoded spans.
//!
//! For a set of labels, emits every maximal run of matching voxels along
//! +x as a 16-byte record (`i32 x, y, z, length`, little-endian) in the
//! global voxel frame. Rows are walked z-major, y-minor within a block;
//! across blocks, output follows the order blocks are handed to
//! [`OutputOp::process`]. A single consumer task owns the sink, so
//! concurrent producers are serialized by the channel.

use std::collections::HashSet;
use std::io::Write;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use common::{Bounds, Point3d, Rle};

use crate::block::PositionedBlock;
use crate::error::{Error, Result};

/// A set of labels selected for projection.
pub type LabelSet = HashSet<u64>;

/// Depth of the block queue feeding the output task.
const QUEUE_CAPACITY: usize = 64;

/// Single-writer sink for RLE projection.
///
/// Feed blocks with [`process`](Self::process) and call
/// [`finish`](Self::finish) to flush and recover the sink. Any
/// projection or write error surfaces at `finish`.
pub struct OutputOp<W> {
    tx: mpsc::Sender<PositionedBlock>,
    task: JoinHandle<Result<W>>,
}

impl<W: Write + Send + 'static> OutputOp<W> {
    /// Spawns the consumer task that projects labels in `labels` from
    /// each processed block into `sink`, clipped to `bounds`.
    pub fn new(labels: LabelSet, bounds: Bounds, sink: W) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = tokio::spawn(write_rles(labels, bounds, rx, sink));
        Self { tx, task }
    }

    /// Queues one positioned block for projection.
    pub async fn process(&self, pb: PositionedBlock) -> Result<()> {
        self.tx
            .send(pb)
            .await
            .map_err(|_| Error::Io("RLE output task stopped".to_string()))
    }

    /// Flushes buffered output and returns the sink. Must be called
    /// after the final `process`; the first error encountered by the
    /// consumer task is returned here.
    pub async fn finish(self) -> Result<W> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| Error::Io(format!("RLE output task failed: {}", e)))?
    }
}

/// Consumer loop: projects each received block and flushes on shutdown.
async fn write_rles<W: Write>(
    labels: LabelSet,
    bounds: Bounds,
    mut rx: mpsc::Receiver<PositionedBlock>,
    mut sink: W,
) -> Result<W> {
    while let Some(pb) = rx.recv().await {
        project_block(&pb, &labels, &bounds, &mut sink)?;
    }
    sink.flush().map_err(|e| Error::Io(e.to_string()))?;
    Ok(sink)
}

/// Emits the runs of one block, rows in z-major y-minor order.
fn project_block<W: Write>(
    pb: &PositionedBlock,
    labels: &LabelSet,
    bounds: &Bounds,
    sink: &mut W,
) -> Result<()> {
    let size = pb.block.size();
    let min = pb.min_voxel();
    let mut buf = BytesMut::new();

    // A solid block needs no decode: every row is one full run.
    if let Some(label) = pb.block.solid_label() {
        if labels.contains(&label) {
            for z in 0..size.z {
                for y in 0..size.y {
                    emit_run(&mut buf, bounds, min.x, min.y + y, min.z + z, size.x);
                }
            }
        }
        return write_buf(sink, &buf);
    }

    let dense = pb.block.label_array()?;
    let (bx, by) = (size.x as usize, size.y as usize);
    for z in 0..size.z {
        let gz = min.z + z;
        for y in 0..size.y {
            let gy = min.y + y;
            if !bounds.contains_yz(gy, gz) {
                continue;
            }
            let row = (z as usize * by + y as usize) * bx;
            let mut run: Option<(i32, i32)> = None;
            for x in 0..bx {
                if labels.contains(&dense[row + x]) {
                    match &mut run {
                        Some((_, length)) => *length += 1,
                        None => run = Some((x as i32, 1)),
                    }
                } else if let Some((start, length)) = run.take() {
                    emit_run(&mut buf, bounds, min.x + start, gy, gz, length);
                }
            }
            if let Some((start, length)) = run {
                emit_run(&mut buf, bounds, min.x + start, gy, gz, length);
            }
        }
    }
    write_buf(sink, &buf)
}

fn emit_run(buf: &mut BytesMut, bounds: &Bounds, x: i32, y: i32, z: i32, length: i32) {
    if !bounds.contains_yz(y, z) {
        return;
    }
    if let Some((cx, clen)) = bounds.clip_x(x, length) {
        Rle::new(Point3d::new(cx, y, z), clen).encode_into(buf);
    }
}

fn write_buf<W: Write>(sink: &mut W, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    sink.write_all(buf).map_err(|e| Error::Io(e.to_string()))
}
