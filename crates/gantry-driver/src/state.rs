//! 机床状态存储
//!
//! 状态只由事件循环线程写入（MCU 上报解码、已释放的延迟动作），
//! 其它线程通过两种方式观察：
//!
//! - **快照**：[`StateView`] 基于 `ArcSwap` 无锁读取完整状态。快照只在
//!   [`StateStore::publish`] 时替换（事件循环每轮处理结束、规划器取块之前），
//!   一轮内的多次上报只复制一次状态表
//! - **变化通知**：[`StateStore::subscribe`] 返回的 channel 接收每次变化的键值
//!
//! ```text
//! 事件循环 ──write──► StateStore ──store──► ArcSwap<StateMap> ◄──load── StateView（UI 线程）
//!                          └──send──► crossbeam channel ──recv──► 订阅者
//! ```

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use gantry_protocol::report::{MOTOR_COUNT, position_var};
use gantry_protocol::{Axis, AxisVector};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 状态表
pub type StateMap = HashMap<String, Value>;

/// 机床状态（MCU 上报的 `xx`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Ready,
    Running,
    Stopping,
    Holding,
    Jogging,
    Homing,
    Estopped,
    Unknown,
}

impl MachineStatus {
    pub fn parse(s: &str) -> MachineStatus {
        match s {
            "READY" => MachineStatus::Ready,
            "RUNNING" => MachineStatus::Running,
            "STOPPING" => MachineStatus::Stopping,
            "HOLDING" => MachineStatus::Holding,
            "JOGGING" => MachineStatus::Jogging,
            "HOMING" => MachineStatus::Homing,
            "ESTOPPED" => MachineStatus::Estopped,
            _ => MachineStatus::Unknown,
        }
    }
}

/// 一次状态变化（只包含发生变化的键）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    pub values: BTreeMap<String, Value>,
}

impl StateChange {
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// 只读状态视图，可跨线程克隆
#[derive(Clone)]
pub struct StateView {
    shared: Arc<ArcSwap<StateMap>>,
}

impl StateView {
    /// 最新的完整快照
    pub fn snapshot(&self) -> Arc<StateMap> {
        self.shared.load_full()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.shared.load().get(name).cloned()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.shared.load().get(name).and_then(as_number)
    }
}

/// 把布尔也当作数值读取
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

/// 可写状态存储（事件循环线程独占）
pub struct StateStore {
    values: StateMap,
    shared: Arc<ArcSwap<StateMap>>,
    listeners: Vec<Sender<StateChange>>,
    next_message_id: u64,
    /// 有尚未发布到快照的变化
    dirty: bool,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let mut store = Self {
            values: StateMap::new(),
            shared: Arc::new(ArcSwap::from_pointee(StateMap::new())),
            listeners: Vec::new(),
            next_message_id: 1,
            dirty: false,
        };
        store.update([
            ("xx".to_string(), json!("")),
            ("line".to_string(), json!(0)),
            ("plan_time".to_string(), json!(0)),
            ("active_program".to_string(), Value::Null),
            ("messages".to_string(), json!([])),
            ("link_state".to_string(), json!("closed")),
            ("link_error".to_string(), Value::Null),
        ]);
        store.reset();
        store.publish();
        store
    }

    pub fn view(&self) -> StateView {
        StateView {
            shared: self.shared.clone(),
        }
    }

    /// 订阅状态变化
    pub fn subscribe(&mut self) -> Receiver<StateChange> {
        let (tx, rx) = unbounded();
        self.listeners.push(tx);
        rx
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        self.values.get(name).and_then(as_number).unwrap_or(default)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(v) => v.as_f64().is_some_and(|n| n != 0.0),
            None => false,
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.update([(name.to_string(), value.into())]);
    }

    /// 合并一组键值，只有真正变化的键会发布
    pub fn update(&mut self, values: impl IntoIterator<Item = (String, Value)>) -> StateChange {
        let mut change = StateChange::default();
        for (key, value) in values {
            if self.values.get(&key) != Some(&value) {
                self.values.insert(key.clone(), value.clone());
                change.values.insert(key, value);
            }
        }

        if !change.values.is_empty() {
            self.dirty = true;
            self.listeners.retain(|tx| tx.send(change.clone()).is_ok());
        }
        change
    }

    /// 把累积的变化发布到快照
    pub fn publish(&mut self) {
        if self.dirty {
            self.shared.store(Arc::new(self.values.clone()));
            self.dirty = false;
        }
    }

    /// MCU 变量表重载
    pub fn set_machine_vars(&mut self, vars: Map<String, Value>) -> StateChange {
        self.update(vars)
    }

    pub fn status(&self) -> MachineStatus {
        MachineStatus::parse(self.get_str("xx").unwrap_or(""))
    }

    /// 当前位置（MCU 上报的 `<axis>p`，缺省为 0）
    pub fn position(&self) -> AxisVector {
        Axis::ALL
            .iter()
            .map(|axis| (*axis, self.get_f64(&position_var(*axis), 0.0)))
            .collect()
    }

    /// 每轴取 `<axis><suffix>`，缺省为 `default`
    pub fn axis_vector(&self, suffix: &str, default: f64) -> AxisVector {
        Axis::ALL
            .iter()
            .map(|axis| (*axis, self.get_f64(&format!("{axis}{suffix}"), default)))
            .collect()
    }

    /// 查找驱动该轴的电机（`<motor>an` 为轴序号或轴字符）
    pub fn find_motor(&self, axis: Axis) -> Option<u8> {
        (0..MOTOR_COUNT).find(|motor| match self.values.get(&format!("{motor}an")) {
            Some(Value::Number(n)) => n.as_u64() == Some(axis.index() as u64),
            Some(Value::String(s)) => s.chars().next().and_then(Axis::from_char) == Some(axis),
            _ => false,
        })
    }

    /// 轴已映射到电机且电机使能（`<motor>me`）
    pub fn is_axis_enabled(&self, axis: Axis) -> bool {
        self.find_motor(axis)
            .is_some_and(|motor| self.get_bool(&format!("{motor}me")))
    }

    /// 轴对应的电机已回零（`<motor>homed`）
    pub fn is_axis_homed(&self, axis: Axis) -> bool {
        self.find_motor(axis)
            .is_some_and(|motor| self.get_bool(&format!("{motor}homed")))
    }

    /// 寻边开关编号：`probe`，或 `<axis>-min` / `<axis>-max`（按电机编号）
    pub fn switch_id(&self, name: &str) -> Option<u8> {
        if name == "probe" {
            return Some(1);
        }
        let (axis, end) = name.split_once('-')?;
        let mut chars = axis.chars();
        let axis = Axis::from_char(chars.next()?)?;
        if chars.next().is_some() {
            return None;
        }
        let motor = self.find_motor(axis)?;
        match end {
            "min" => Some(2 + 2 * motor),
            "max" => Some(3 + 2 * motor),
            _ => None,
        }
    }

    /// 添加需要操作员确认的消息，返回消息 ID
    pub fn add_message(&mut self, text: &str) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;

        let mut messages = self.messages();
        messages.push(json!({ "id": id, "text": text }));
        self.set("messages", Value::Array(messages));
        id
    }

    /// 确认（移除）一条消息
    pub fn ack_message(&mut self, id: u64) -> bool {
        let mut messages = self.messages();
        let before = messages.len();
        messages.retain(|m| m.get("id").and_then(Value::as_u64) != Some(id));
        let removed = messages.len() != before;
        if removed {
            self.set("messages", Value::Array(messages));
        }
        removed
    }

    fn messages(&self) -> Vec<Value> {
        match self.values.get("messages") {
            Some(Value::Array(list)) => list.clone(),
            _ => Vec::new(),
        }
    }

    /// 恢复程序相关状态：取消回零、位置与偏移清零
    pub fn reset(&mut self) {
        let mut values: Vec<(String, Value)> = (0..MOTOR_COUNT)
            .map(|motor| (format!("{motor}homed"), json!(false)))
            .collect();
        for axis in Axis::ALL {
            values.push((position_var(axis), json!(0.0)));
            values.push((format!("offset_{axis}"), json!(0.0)));
        }
        values.push(("plan_time".to_string(), json!(0)));
        values.push(("active_program".to_string(), Value::Null));
        self.update(values);
    }
}
