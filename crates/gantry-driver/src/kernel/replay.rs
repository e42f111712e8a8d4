//! 离线块流回放内核
//!
//! 程序文本为 JSON Lines，每行一个已规划好的 [`Block`]（`#` 开头为注释）。
//! 用于在没有在线规划器的环境中运行预先规划的程序，以及测试。
//!
//! `set` 块的值如果是以 `_` 开头的字符串，会在输出时通过变量解析钩子取值。

use super::{Block, KernelConfig, KernelError, KernelLogger, MotionKernel, Units, VarResolver};
use gantry_protocol::AxisVector;
use serde_json::{Value, json};

/// 回放内核
#[derive(Default)]
pub struct ReplayKernel {
    blocks: Vec<Block>,
    cursor: usize,
    active: Option<u32>,
    position: AxisVector,
    units: Option<Units>,
    resolver: Option<VarResolver>,
    logger: Option<KernelLogger>,
    last_result: Option<Value>,
}

impl ReplayKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次 MCU 反馈
    pub fn last_result(&self) -> Option<&Value> {
        self.last_result.as_ref()
    }

    pub fn position(&self) -> &AxisVector {
        &self.position
    }

    fn log(&self, line: &str) {
        if let Some(logger) = &self.logger {
            logger(line);
        }
    }

    fn resolve(&self, block: Block) -> Block {
        let Block::Set(mut set) = block else {
            return block;
        };
        if let Value::String(name) = &set.value
            && name.starts_with('_')
            && let Some(resolver) = &self.resolver
        {
            let value = resolver(name, self.units.unwrap_or(Units::Metric));
            set.value = json!(value);
        }
        Block::Set(set)
    }
}

impl MotionKernel for ReplayKernel {
    fn load(
        &mut self,
        name: &str,
        program: &str,
        config: &KernelConfig,
    ) -> Result<(), KernelError> {
        let mut blocks = Vec::new();
        for (index, line) in program.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let block: Block = serde_json::from_str(line)
                .map_err(|e| KernelError::Load(format!("{}:{}: {}", name, index + 1, e)))?;
            blocks.push(block);
        }

        self.blocks = blocks;
        self.cursor = 0;
        self.active = None;
        self.units = Some(config.default_units);
        self.log(&format!("I1:{}:Loaded {} blocks", name, self.blocks.len()));
        Ok(())
    }

    fn has_more(&self) -> bool {
        self.cursor < self.blocks.len()
    }

    fn next(&mut self) -> Result<Option<Block>, KernelError> {
        let Some(block) = self.blocks.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(self.resolve(block)))
    }

    fn set_resolver(&mut self, resolver: Option<VarResolver>) {
        self.resolver = resolver;
    }

    fn set_logger(&mut self, logger: Option<KernelLogger>) {
        self.logger = logger;
    }

    fn restart(&mut self, id: u32, position: &AxisVector) -> Result<(), KernelError> {
        if self.blocks.is_empty() {
            return Err(KernelError::NotLoaded);
        }
        self.cursor = self
            .blocks
            .iter()
            .position(|b| b.id() > id)
            .unwrap_or(self.blocks.len());
        self.active = Some(id);
        self.position = position.clone();
        self.log(&format!("I1:Restart at {id}"));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), KernelError> {
        self.blocks.clear();
        self.cursor = 0;
        self.active = None;
        Ok(())
    }

    fn set_position(&mut self, position: &AxisVector) {
        self.position = position.clone();
    }

    fn set_active(&mut self, id: u32) {
        self.active = Some(id);
    }

    fn synchronize(&mut self, result: &Value) {
        self.last_result = Some(result.clone());
    }

    fn is_running(&self) -> bool {
        let Some(last) = self.blocks.last() else {
            return false;
        };
        self.has_more() || self.active.is_none_or(|active| active < last.id())
    }
}
