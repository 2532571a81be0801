use crate::access::tuple::{Rid, Tuple};
use crate::catalog::Schema;
use crate::executor::{wrap_child_error, Executor};
use anyhow::{bail, Result};

/// Skip `offset` child rows, then pass through at most `limit`.
pub struct LimitExecutor {
    child: Box<dyn Executor>,
    offset: usize,
    limit: usize,
    produced: usize,
    skipped: usize,
    initialized: bool,
}

impl LimitExecutor {
    pub fn new(child: Box<dyn Executor>, offset: usize, limit: usize) -> Self {
        Self {
            child,
            offset,
            limit,
            produced: 0,
            skipped: 0,
            initialized: false,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init().map_err(wrap_child_error)?;
        self.produced = 0;
        self.skipped = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        loop {
            if self.produced >= self.limit {
                return Ok(None);
            }
            let Some(row) = self.child.next().map_err(wrap_child_error)? else {
                return Ok(None);
            };
            if self.skipped < self.offset {
                self.skipped += 1;
                continue;
            }
            self.produced += 1;
            return Ok(Some(row));
        }
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
