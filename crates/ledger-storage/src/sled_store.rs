use anyhow::{anyhow, bail, Context, Result};
use ledger_core::{Block, ChainEntry, ChainStore, Hash, Snapshot};
use sled::{
  transaction::{ConflictableTransactionResult, TransactionError},
  Db, IVec, Transactional, Tree,
};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const TREE_SNAPSHOTS: &str = "snapshots";
const TREE_META: &str = "meta";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";

/// Blocks and balance snapshots keyed by big-endian index, so iteration
/// order is chain order.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  snapshots: Tree,
  meta: Tree,
}

fn decode_u64(v: &IVec) -> Result<u64> {
  let arr: [u8; 8] = v.as_ref().try_into().context("stored height is not 8 bytes")?;
  Ok(u64::from_be_bytes(arr))
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let db = sled::open(path).context("open sled database")?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    let snapshots = db.open_tree(TREE_SNAPSHOTS)?;
    let meta = db.open_tree(TREE_META)?;
    info!("sled store opened");
    Ok(Self {
      db,
      blocks,
      snapshots,
      meta,
    })
  }

  pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
    self
      .blocks
      .get(index.to_be_bytes())?
      .map(|ivec| bincode::deserialize(&ivec).with_context(|| format!("decode block {index}")))
      .transpose()
  }

  pub fn get_snapshot(&self, index: u64) -> Result<Option<Snapshot>> {
    self
      .snapshots
      .get(index.to_be_bytes())?
      .map(|ivec| bincode::deserialize(&ivec).with_context(|| format!("decode snapshot {index}")))
      .transpose()
  }

  /// Remove everything. Used by tests to reset a store in place.
  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.snapshots.clear()?;
    self.meta.clear()?;
    self.db.flush()?;
    Ok(())
  }

  fn stored_height(&self) -> Result<Option<u64>> {
    self.meta.get(KEY_TIP_HEIGHT)?.map(|v| decode_u64(&v)).transpose()
  }
}

impl ChainStore for SledStore {
  fn put_entries(&self, entries: &[ChainEntry]) -> Result<()> {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
      return Ok(());
    };
    let start = first.block.index();
    let new_height = last.block.index();
    let next_free = self.stored_height()?.map_or(0, |h| h + 1);
    if start > next_free {
      bail!("entry at index {start} would leave a gap after height {next_free}");
    }
    // Indices above the new tip were derived from replaced blocks.
    let stale: Vec<Vec<u8>> = match self.stored_height()? {
      Some(old) if old > new_height => ((new_height + 1)..=old)
        .map(|i| i.to_be_bytes().to_vec())
        .collect(),
      _ => vec![],
    };

    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
      let key = entry.block.index().to_be_bytes().to_vec();
      let block = bincode::serialize(&entry.block)?;
      let snapshot = bincode::serialize(&entry.snapshot)?;
      rows.push((key, block, snapshot));
    }
    let tip_height = new_height.to_be_bytes().to_vec();
    let tip_hash = last.block.hash().to_vec();

    (&self.blocks, &self.snapshots, &self.meta)
      .transaction(|(blocks, snapshots, meta)| -> ConflictableTransactionResult<(), ()> {
        for (key, block, snapshot) in &rows {
          blocks.insert(key.clone(), block.clone())?;
          snapshots.insert(key.clone(), snapshot.clone())?;
        }
        for key in &stale {
          blocks.remove(key.clone())?;
          snapshots.remove(key.clone())?;
        }
        meta.insert(KEY_TIP_HEIGHT, tip_height.clone())?;
        meta.insert(KEY_TIP_HASH, tip_hash.clone())?;
        Ok(())
      })
      .map_err(|e: TransactionError<()>| anyhow!("sled transaction failed: {e:?}"))?;

    self.db.flush()?;
    debug!(start, new_height, "persisted chain entries");
    Ok(())
  }

  fn load(&self) -> Result<Vec<ChainEntry>> {
    let mut entries = Vec::new();
    for (i, item) in self.blocks.iter().enumerate() {
      let (key, value) = item?;
      let index = decode_u64(&key)?;
      if index != i as u64 {
        bail!("stored blocks skip from {} to {index}", i as u64);
      }
      let block: Block =
        bincode::deserialize(&value).with_context(|| format!("decode block {index}"))?;
      let snapshot = self
        .get_snapshot(index)?
        .with_context(|| format!("missing snapshot for block {index}"))?;
      entries.push(ChainEntry { block, snapshot });
    }
    Ok(entries)
  }

  fn tip_height(&self) -> Result<u64> {
    Ok(self.stored_height()?.unwrap_or(0))
  }

  fn tip_hash(&self) -> Result<Option<Hash>> {
    self
      .meta
      .get(KEY_TIP_HASH)?
      .map(|v| {
        let arr: Hash = v.as_ref().try_into().context("stored tip hash is not 32 bytes")?;
        Ok(arr)
      })
      .transpose()
  }

  fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
