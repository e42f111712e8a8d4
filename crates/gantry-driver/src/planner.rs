//! 规划适配器
//!
//! 包装外部运动内核：把内核输出的运动块编码成线缆指令，把主机侧副作用
//! 挂到同步命令队列上，并累计规划时间用于进度显示。
//!
//! # 编码规则
//!
//! - 每个发出的单元都以 `#id=<id>` 开头，并入队一个只用于跟踪的条目
//! - `line`：累加分段时间（`first`/`seeking` 段不计时）
//! - `dwell`：累加等待秒数
//! - `set`：见 [`SyncVar`]
//! - `end`：入队"程序结束"动作，仍然发送只有 ID 的单元
//! - `start`：只做记录，不编码
//!
//! # 失败处理
//!
//! 取块、编码或重新规划失败只中止当前程序（`stop()`），错误写入操作员日志，
//! 并作为需要确认的消息发布到 `messages`，进程继续运行。

use crate::config::PlannerSettings;
use crate::error::DriverError;
use crate::kernel::log::kernel_logger;
use crate::kernel::{
    Block, DwellBlock, KernelConfig, LineBlock, MotionKernel, SetBlock, Units,
};
use crate::queue::CommandQueue;
use crate::state::{MachineStatus, StateStore, StateView};
use crate::sync_var::SyncVar;
use gantry_protocol::command::{self, SyncValue};
use gantry_protocol::{Axis, AxisVector};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 等 MCU 确认后才执行的主机侧动作
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred {
    /// 写入状态变量
    SetVar { name: String, value: Value },
    /// 提示操作员
    Message(String),
    /// 开始一段计时运动
    UpdateTime { plan_time: f64, move_time: f64 },
    /// 程序正常结束
    EndProgram(&'static str),
}

/// 程序结束回调，参数为结束原因
pub type EndCallback = Box<dyn FnOnce(&str)>;

/// 程序来源
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramSource {
    /// 已解析的文件（逻辑路径 + 内容）
    File { path: String, contents: String },
    /// 手动输入的程序文本
    Mdi(String),
}

impl ProgramSource {
    pub fn label(&self) -> &str {
        match self {
            ProgramSource::File { path, .. } => path,
            ProgramSource::Mdi(_) => "MDI",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ProgramSource::Mdi(_))
    }

    fn body(&self) -> &str {
        match self {
            ProgramSource::File { contents, .. } => contents,
            ProgramSource::Mdi(text) => text,
        }
    }
}

/// 规划时间
#[derive(Debug, Clone, Default)]
struct PlanTimes {
    /// 已规划的累计时间（秒）
    plan_time: f64,
    /// 当前运动开始时的累计时间
    current_plan_time: f64,
    /// 当前运动时长
    move_time: f64,
    move_start: Option<Instant>,
}

/// 当前程序会话
#[derive(Default)]
struct PlannerSession {
    label: String,
    position: AxisVector,
    /// 嵌套加载时内层在栈顶
    end_callbacks: Vec<EndCallback>,
}

pub struct PlannerAdapter {
    kernel: Box<dyn MotionKernel>,
    settings: PlannerSettings,
    view: StateView,
    session: PlannerSession,
    times: PlanTimes,
}

impl PlannerAdapter {
    pub fn new(kernel: Box<dyn MotionKernel>, settings: PlannerSettings, state: &StateStore) -> Self {
        let mut adapter = Self {
            kernel,
            settings,
            view: state.view(),
            session: PlannerSession::default(),
            times: PlanTimes::default(),
        };
        adapter.install_hooks();
        adapter
    }

    fn install_hooks(&mut self) {
        let view = self.view.clone();
        self.kernel
            .set_resolver(Some(Box::new(move |name: &str, units: Units| {
                resolve_var(&view, name, units)
            })));
        self.kernel.set_logger(Some(kernel_logger()));
    }

    /// 内核仍在规划（或等待 MCU 执行完已规划的块）
    pub fn is_running(&self) -> bool {
        self.kernel.is_running()
    }

    /// 规划中，或仍有未确认的指令
    pub fn is_busy<T>(&self, queue: &CommandQueue<T>) -> bool {
        self.is_running() || queue.is_active()
    }

    /// 累计规划时间（秒）
    pub fn planned_time(&self) -> f64 {
        self.times.plan_time
    }

    /// 当前活动程序（文件路径或 `MDI`）
    pub fn active_program(&self) -> Option<&str> {
        if self.session.end_callbacks.is_empty() {
            None
        } else {
            Some(&self.session.label)
        }
    }

    /// 加载时同步给内核的位置
    pub fn start_position(&self) -> &AxisVector {
        &self.session.position
    }

    /// 根据机床状态与设置生成内核配置
    pub fn kernel_config(&self, state: &StateStore, with_start: bool, with_limits: bool) -> KernelConfig {
        let settings = &self.settings;
        let is_pwm = settings.tool_type.as_deref() == Some("PWM Spindle");
        let deviation = settings.max_deviation;

        let (min_soft_limit, max_soft_limit) = if with_limits {
            let mut min = state.axis_vector("tn", f64::NEG_INFINITY);
            let mut max = state.axis_vector("tm", f64::INFINITY);
            for axis in Axis::ALL {
                if max[&axis] <= min[&axis] {
                    min.insert(axis, f64::NEG_INFINITY);
                    max.insert(axis, f64::INFINITY);
                }
            }
            (Some(min), Some(max))
        } else {
            (None, None)
        };

        let mut overrides = BTreeMap::new();
        if let Some(tool_change) = &settings.tool_change {
            overrides.insert("M6".to_string(), tool_change.clone());
        }
        if let Some(program_end) = &settings.program_end {
            overrides.insert("M2".to_string(), program_end.clone());
            overrides.insert("M30".to_string(), program_end.clone());
        }

        KernelConfig {
            // 当前单位制，而不是配置的默认单位制
            default_units: if state.get_bool("metric") {
                Units::Metric
            } else {
                Units::Imperial
            },
            max_vel: state.axis_vector("vm", 1000.0),
            max_accel: state.axis_vector("am", 1_000_000.0),
            max_jerk: state.axis_vector("jm", 1_000_000.0),
            rapid_auto_off: settings.rapid_auto_off && is_pwm,
            max_blend_error: deviation,
            max_merge_error: deviation,
            max_arc_error: deviation / 10.0,
            junction_accel: settings.junction_accel,
            min_soft_limit,
            max_soft_limit,
            program_start: if with_start {
                settings.program_start.clone()
            } else {
                None
            },
            overrides,
        }
    }

    /// 加载程序
    ///
    /// 回调压入结束栈；加载失败时立即弹出并以失败原因调用。
    pub fn load(
        &mut self,
        callback: EndCallback,
        source: ProgramSource,
        config: KernelConfig,
        state: &mut StateStore,
    ) -> Result<(), DriverError> {
        self.session.end_callbacks.push(callback);
        self.session.label = source.label().to_string();
        info!(target: "operator", "Start: {}", self.session.label);
        state.set("active_program", self.session.label.as_str());

        // 同步位置
        let position = state.position();
        self.kernel.set_position(&position);
        self.session.position = position;

        debug!(
            "Config: {}",
            serde_json::to_string(&config).unwrap_or_default()
        );
        if let Err(e) = self.kernel.load(source.label(), source.body(), &config) {
            let text = format!("Failed to load {}: {}", source.label(), e);
            error!(target: "operator", "{}", text);
            state.add_message(&text);
            self.end_program(Some("Program load failed"), false, state);
            return Err(e.into());
        }

        self.reset_times();
        Ok(())
    }

    /// 取出下一个发送单元
    ///
    /// 内核没有可输出的块时返回 `None`；出错时中止当前程序并返回 `None`。
    pub fn next(&mut self, queue: &mut CommandQueue<Deferred>, state: &mut StateStore) -> Option<String> {
        // 内核的变量解析读取快照
        state.publish();

        while self.kernel.has_more() {
            let block = match self.kernel.next() {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    self.fail(&e.to_string(), queue, state);
                    return None;
                },
            };

            match self.encode(block, queue, state) {
                Ok(Some(unit)) => return Some(unit),
                Ok(None) => continue,
                Err(e) => {
                    self.fail(&e.to_string(), queue, state);
                    return None;
                },
            }
        }
        None
    }

    /// 程序错误：写入操作员日志、发布消息并中止当前程序
    fn fail(&mut self, text: &str, queue: &mut CommandQueue<Deferred>, state: &mut StateStore) {
        let location = self.location(state);
        error!(target: "operator", location = %location, "{}", text);
        state.add_message(text);
        self.stop(queue, state);
    }

    fn encode(
        &mut self,
        block: Block,
        queue: &mut CommandQueue<Deferred>,
        state: &StateStore,
    ) -> Result<Option<String>, DriverError> {
        let id = block.id();

        if !matches!(block, Block::Set(_) | Block::Start { .. }) {
            debug!("Cmd: {}", serde_json::to_string(&block).unwrap_or_default());
        }

        let body = match block {
            Block::Start { .. } => None,

            Block::Line(line) => {
                self.enqueue_line_time(&line, queue);
                Some(command::line(
                    &line.target,
                    line.exit_vel,
                    line.max_accel,
                    line.max_jerk,
                    &line.times,
                    &line.speeds,
                )?)
            },

            Block::Set(set) => self.encode_set(set, queue, state)?,

            Block::Input(input) => Some(command::input(
                input.port.parse()?,
                input.mode.parse()?,
                input.timeout,
            )?),

            Block::Output(output) => Some(command::output(output.port, output_level(&output.value)?)),

            Block::Dwell(dwell) => {
                self.enqueue_dwell_time(&dwell, queue);
                Some(command::dwell(dwell.seconds)?)
            },

            Block::Pause(pause) => Some(command::pause(pause.pause_type.parse()?)),

            Block::Seek(seek) => {
                let switch = state.switch_id(&seek.switch).ok_or_else(|| {
                    DriverError::InvalidBlock(format!("unknown switch {:?}", seek.switch))
                })?;
                Some(command::seek(switch, seek.active, seek.error))
            },

            Block::End { .. } => {
                queue.enqueue(id, Some(Deferred::EndProgram("Program end")));
                // 空指令体仍然发送同步 ID
                Some(String::new())
            },
        };

        Ok(body.map(|body| {
            queue.enqueue(id, None);
            command::frame_unit(id, &body)
        }))
    }

    fn encode_set(
        &mut self,
        set: SetBlock,
        queue: &mut CommandQueue<Deferred>,
        state: &StateStore,
    ) -> Result<Option<String>, DriverError> {
        let var = match SyncVar::parse(&set.name) {
            Ok(var) => var,
            Err(e) => {
                warn!("Ignoring set block #{}: {}", set.id, e);
                return Ok(None);
            },
        };

        let id = set.id;
        let value = set.value;
        let enqueue_set = |queue: &mut CommandQueue<Deferred>, value: &Value| {
            let name = var.state_key();
            debug!("set(#{}, {}, {})", id, name, value);
            queue.enqueue(
                id,
                Some(Deferred::SetVar {
                    name,
                    value: value.clone(),
                }),
            );
        };

        match &var {
            SyncVar::Message => {
                let text = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                queue.enqueue(id, Some(Deferred::Message(text)));
                Ok(None)
            },

            SyncVar::Line | SyncVar::Tool | SyncVar::Other(_) => {
                enqueue_set(queue, &value);
                Ok(None)
            },

            SyncVar::Speed => {
                enqueue_set(queue, &value);
                Ok(Some(command::speed(number(&value, "speed")?)?))
            },

            SyncVar::Feed => {
                enqueue_set(queue, &value);
                let feed = number(&value, "feed")?;
                let inverse = if feed != 0.0 { 1.0 / feed } else { 0.0 };
                Ok(Some(command::set_sync("if", inverse)?))
            },

            // 位置由 MCU 上报驱动，不排队
            SyncVar::AxisPosition(axis) => {
                debug!("Not queueing {} position {}", axis, value);
                Ok(None)
            },

            SyncVar::AxisHome(axis) => {
                enqueue_set(queue, &value);
                Ok(Some(command::set_axis(*axis, number(&value, "home")?)?))
            },

            SyncVar::AxisHomed(axis) => {
                enqueue_set(queue, &value);
                match state.find_motor(*axis) {
                    Some(motor) => Ok(Some(command::set_sync(
                        &format!("{motor}h"),
                        sync_value(&value)?,
                    )?)),
                    None => Ok(None),
                }
            },
        }
    }

    fn enqueue_line_time(&mut self, line: &LineBlock, queue: &mut CommandQueue<Deferred>) {
        if line.first || line.seeking {
            return;
        }

        // 毫秒转秒
        let move_time = line.times.iter().sum::<f64>() / 1000.0;
        queue.enqueue(
            line.id,
            Some(Deferred::UpdateTime {
                plan_time: self.times.plan_time,
                move_time,
            }),
        );
        self.times.plan_time += move_time;
    }

    fn enqueue_dwell_time(&mut self, dwell: &DwellBlock, queue: &mut CommandQueue<Deferred>) {
        queue.enqueue(
            dwell.id,
            Some(Deferred::UpdateTime {
                plan_time: self.times.plan_time,
                move_time: dwell.seconds,
            }),
        );
        self.times.plan_time += dwell.seconds;
    }

    /// 执行一个已被 MCU 确认的延迟动作
    pub fn apply(&mut self, action: Deferred, state: &mut StateStore, now: Instant) {
        match action {
            Deferred::SetVar { name, value } => state.set(&name, value),
            Deferred::Message(text) => self.add_message(&text, state),
            Deferred::UpdateTime {
                plan_time,
                move_time,
            } => {
                self.times.current_plan_time = plan_time;
                self.times.move_time = move_time;
                self.times.move_start = Some(now);
            },
            Deferred::EndProgram(msg) => {
                self.end_program(Some(msg), false, state);
            },
        }
    }

    fn add_message(&self, text: &str, state: &mut StateStore) {
        state.add_message(text);
        info!(target: "operator", location = %self.location(state), "{}", text);
    }

    fn location(&self, state: &StateStore) -> String {
        let line = state.get_f64("line", 0.0);
        if line >= 0.0 {
            format!("{}:{}", self.session.label, line as i64)
        } else {
            self.session.label.clone()
        }
    }

    /// 手动设置位置后同步给内核
    pub fn set_position(&mut self, position: &AxisVector) {
        self.kernel.set_position(position);
    }

    /// MCU 已执行到 `id`
    pub fn set_active(&mut self, id: u32) {
        self.kernel.set_active(id);
    }

    /// MCU 反馈值
    pub fn result(&mut self, result: &Value) {
        self.kernel.synchronize(result);
    }

    /// 每秒刷新进度
    ///
    /// 运行或停止中时为当前运动开始时的累计时间加上已用时间（不超过当前运动时长），
    /// 其它状态（包括暂停）为 0。
    pub fn report_time(&self, now: Instant, state: &mut StateStore) {
        let elapsed = match (state.status(), self.times.move_start) {
            (MachineStatus::Running | MachineStatus::Stopping, Some(start)) => {
                let delta = now
                    .saturating_duration_since(start)
                    .as_secs_f64()
                    .min(self.times.move_time);
                self.times.current_plan_time + delta
            },
            _ => 0.0,
        };
        state.set("plan_time", elapsed.round() as u64);
    }

    /// 从已确认的 ID 和位置重新规划
    ///
    /// 内核从已确认的块之后继续输出，计时基线取最近一次已确认计时块的结束时间
    /// （暂停期间上报的 `plan_time` 为 0，不能作为基线）。
    pub fn restart(
        &mut self,
        id: u32,
        position: &AxisVector,
        queue: &mut CommandQueue<Deferred>,
        state: &mut StateStore,
    ) {
        info!("Planner restart: {} {:?}", id, position);

        queue.clear();
        self.times.plan_time = self.times.current_plan_time + self.times.move_time;
        if let Err(e) = self.kernel.restart(id, position) {
            self.fail(&format!("Planner restart failed: {e}"), queue, state);
        }
    }

    /// 中止规划，清空队列，结束所有程序
    pub fn stop(&mut self, queue: &mut CommandQueue<Deferred>, state: &mut StateStore) {
        match self.kernel.stop() {
            Ok(()) => {
                queue.clear();
                self.end_program(Some("Program stop"), true, state);
            },
            Err(e) => {
                error!("Planner stop failed: {}", e);
                self.reset(queue, state);
            },
        }
    }

    /// 完全复位：结束所有程序，清空队列与计时，恢复机床状态
    pub fn reset(&mut self, queue: &mut CommandQueue<Deferred>, state: &mut StateStore) {
        self.end_program(Some("Program reset"), true, state);
        if let Err(e) = self.kernel.stop() {
            warn!("Kernel stop during reset failed: {}", e);
        }
        self.install_hooks();
        queue.clear();
        self.reset_times();
        state.reset();
    }

    /// 结束程序，返回实际结束的程序数
    ///
    /// `end_all` 时按内层优先依次调用所有回调，否则只结束最内层。
    pub fn end_program(&mut self, msg: Option<&str>, end_all: bool, state: &mut StateStore) -> usize {
        state.set("active_program", Value::Null);
        let reason = msg.unwrap_or("Program end");

        let mut ended = 0;
        while let Some(callback) = self.session.end_callbacks.pop() {
            callback(reason);
            ended += 1;
            if !end_all {
                break;
            }
        }

        // 没有活动程序时（例如停止握手的第二次 stop）不重复提示
        if ended == 0 {
            debug!("{} with no active program", reason);
        } else if let Some(msg) = msg {
            info!(target: "operator", "{}", msg);
        }
        ended
    }

    /// 断开内核钩子
    pub fn close(&mut self) {
        self.kernel.set_resolver(None);
        self.kernel.set_logger(None);
    }

    fn reset_times(&mut self) {
        self.times = PlanTimes::default();
    }
}

/// 内核变量解析：`_name` 取状态值，英制时按毫米换算
pub fn resolve_var(view: &StateView, name: &str, units: Units) -> f64 {
    let value = name
        .strip_prefix('_')
        .and_then(|key| view.get_f64(key))
        .map(|v| if units == Units::Imperial { v / 25.4 } else { v })
        .unwrap_or(0.0);
    debug!("Get: {}={} (units={:?})", name, value, units);
    value
}

fn number(value: &Value, field: &str) -> Result<f64, DriverError> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| DriverError::InvalidBlock(format!("{field} is not a number: {value}")))
}

fn sync_value(value: &Value) -> Result<SyncValue, DriverError> {
    match value {
        Value::Bool(b) => Ok(SyncValue::from(*b)),
        Value::Number(n) if n.is_i64() => Ok(SyncValue::Int(n.as_i64().unwrap_or_default())),
        other => Ok(SyncValue::Float(number(other, "value")?)),
    }
}

/// 输出电平：数值或数值字符串，截断为整数
fn output_level(value: &Value) -> Result<u8, DriverError> {
    let level = number(value, "output value")?;
    if !(0.0..256.0).contains(&level) {
        return Err(DriverError::InvalidBlock(format!(
            "output value out of range: {level}"
        )));
    }
    Ok(level as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ReplayKernel;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn adapter(state: &StateStore) -> PlannerAdapter {
        PlannerAdapter::new(
            Box::new(ReplayKernel::new()),
            PlannerSettings::default(),
            state,
        )
    }

    fn load(
        planner: &mut PlannerAdapter,
        state: &mut StateStore,
        program: &str,
    ) -> Rc<RefCell<Vec<String>>> {
        let ended = Rc::new(RefCell::new(Vec::new()));
        let sink = ended.clone();
        let config = planner.kernel_config(state, true, true);
        planner
            .load(
                Box::new(move |reason: &str| sink.borrow_mut().push(reason.to_string())),
                ProgramSource::Mdi(program.to_string()),
                config,
                state,
            )
            .unwrap();
        ended
    }

    fn drain(
        planner: &mut PlannerAdapter,
        queue: &mut CommandQueue<Deferred>,
        state: &mut StateStore,
    ) -> Vec<String> {
        std::iter::from_fn(|| planner.next(queue, state)).collect()
    }

    const THREE_BLOCKS: &str = r#"
{"type": "line", "id": 1, "target": {"x": 1}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [1000, 500]}
{"type": "dwell", "id": 2, "seconds": 2.5}
{"type": "end", "id": 3}
"#;

    #[test]
    fn test_units_carry_id_prefix() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        load(&mut planner, &mut state, THREE_BLOCKS);

        let units = drain(&mut planner, &mut queue, &mut state);
        assert_eq!(units.len(), 3);
        assert!(units[0].starts_with("#id=1\nl"));
        assert_eq!(units[1], "#id=2\nd:AAAgQA\n");
        assert_eq!(units[2], "#id=3\n");
    }

    #[test]
    fn test_planned_time_sums_segments_and_dwell() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        load(&mut planner, &mut state, THREE_BLOCKS);
        drain(&mut planner, &mut queue, &mut state);

        assert_eq!(planner.planned_time(), 1.5 + 2.5);
    }

    #[test]
    fn test_first_and_seeking_lines_are_not_timed() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        load(
            &mut planner,
            &mut state,
            r#"
{"type": "line", "id": 1, "target": {"x": 1}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [1000], "first": true}
{"type": "line", "id": 2, "target": {"x": 2}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [1000], "seeking": true}
{"type": "line", "id": 3, "target": {"x": 3}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [250]}
"#,
        );
        drain(&mut planner, &mut queue, &mut state);
        assert_eq!(planner.planned_time(), 0.25);
    }

    #[test]
    fn test_end_callback_fires_once_on_final_ack() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        let ended = load(&mut planner, &mut state, THREE_BLOCKS);
        drain(&mut planner, &mut queue, &mut state);

        let now = Instant::now();
        for ack in [1, 2, 3, 3, 2] {
            for action in queue.release(ack) {
                planner.apply(action, &mut state, now);
            }
        }
        assert_eq!(ended.borrow().as_slice(), ["Program end"]);
        assert_eq!(state.get("active_program"), Some(&Value::Null));
        assert!(!queue.is_active());
    }

    #[test]
    fn test_set_rules() {
        let mut state = StateStore::new();
        state.update([
            ("0an".to_string(), json!(0)),
            ("1an".to_string(), json!(1)),
        ]);
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        load(
            &mut planner,
            &mut state,
            r#"
{"type": "start", "id": 1}
{"type": "set", "id": 2, "name": "line", "value": 12}
{"type": "set", "id": 3, "name": "_x", "value": 4.0}
{"type": "set", "id": 4, "name": "_feed", "value": 2}
{"type": "set", "id": 5, "name": "speed", "value": 100}
{"type": "set", "id": 6, "name": "_y_home", "value": 1.0}
{"type": "set", "id": 7, "name": "_y_homed", "value": true}
{"type": "set", "id": 8, "name": "coolant", "value": 1}
{"type": "set", "id": 9, "name": "message", "value": "Insert tool 3"}
"#,
        );

        let units = drain(&mut planner, &mut queue, &mut state);
        assert_eq!(
            units,
            vec![
                "#id=4\n#if=:AAAAPw\n".to_string(),
                "#id=5\np:AADIQg\n".to_string(),
                "#id=6\nay:AACAPw\n".to_string(),
                "#id=7\n#1h=1\n".to_string(),
            ]
        );

        // 变量在确认前不生效
        assert_eq!(state.get_f64("line", 0.0), 0.0);

        let now = Instant::now();
        for action in queue.release(9) {
            planner.apply(action, &mut state, now);
        }
        assert_eq!(state.get_f64("line", 0.0), 12.0);
        assert_eq!(state.get_f64("feed", 0.0), 2.0);
        assert_eq!(state.get_f64("speed", 0.0), 100.0);
        assert_eq!(state.get_f64("y_home", 0.0), 1.0);
        assert!(state.get_bool("y_homed"));
        assert!(state.get("x").is_none());
        assert!(state.get("coolant").is_none());
        assert_eq!(state.get("messages").unwrap()[0]["text"], "Insert tool 3");
    }

    #[test]
    fn test_encode_error_stops_program() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        let ended = load(
            &mut planner,
            &mut state,
            r#"
{"type": "dwell", "id": 1, "seconds": 1}
{"type": "pause", "id": 2, "pause-type": "forever"}
{"type": "dwell", "id": 3, "seconds": 1}
"#,
        );

        assert!(planner.next(&mut queue, &mut state).is_some());
        assert!(planner.next(&mut queue, &mut state).is_none());
        assert_eq!(ended.borrow().as_slice(), ["Program stop"]);
        assert!(!queue.is_active());
        assert!(!planner.is_running());

        // 错误作为需要确认的消息发布
        let messages = state.get("messages").unwrap().as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["text"].as_str().unwrap().contains("forever"));
    }

    #[test]
    fn test_restart_after_hold_keeps_time_baseline() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        load(
            &mut planner,
            &mut state,
            r#"
{"type": "line", "id": 1, "target": {"x": 1}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [10000]}
{"type": "line", "id": 2, "target": {"x": 2}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [10000]}
{"type": "line", "id": 3, "target": {"x": 3}, "exit-vel": 0, "max-accel": 1, "max-jerk": 1, "times": [10000]}
"#,
        );
        drain(&mut planner, &mut queue, &mut state);
        assert_eq!(planner.planned_time(), 30.0);

        let t0 = Instant::now();
        state.set("xx", "RUNNING");
        for action in queue.release(2) {
            planner.apply(action, &mut state, t0);
        }
        planner.report_time(t0 + Duration::from_secs(1), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 11.0);

        state.set("xx", "HOLDING");
        planner.report_time(t0 + Duration::from_secs(2), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 0.0);

        let position = state.position();
        planner.restart(2, &position, &mut queue, &mut state);
        let units = drain(&mut planner, &mut queue, &mut state);
        assert_eq!(units.len(), 1);
        assert!(units[0].starts_with("#id=3\n"));

        let t1 = t0 + Duration::from_secs(5);
        state.set("xx", "RUNNING");
        for action in queue.release(3) {
            planner.apply(action, &mut state, t1);
        }
        planner.report_time(t1 + Duration::from_secs(1), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 21.0);
        assert_eq!(planner.planned_time(), 30.0);
    }

    #[test]
    fn test_restart_failure_posts_message() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);

        // 没有加载程序时内核无法重新规划
        let position = state.position();
        planner.restart(4, &position, &mut queue, &mut state);

        let messages = state.get("messages").unwrap().as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["text"].as_str().unwrap().starts_with("Planner restart failed"));
    }

    #[test]
    fn test_nested_programs_end_innermost_first() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        let order = Rc::new(RefCell::new(Vec::new()));

        for name in ["outer", "inner"] {
            let sink = order.clone();
            let config = planner.kernel_config(&state, false, false);
            planner
                .load(
                    Box::new(move |_: &str| sink.borrow_mut().push(name)),
                    ProgramSource::Mdi(String::new()),
                    config,
                    &mut state,
                )
                .unwrap();
        }

        assert_eq!(planner.end_program(None, false, &mut state), 1);
        assert_eq!(order.borrow().as_slice(), ["inner"]);
        assert_eq!(planner.active_program(), Some("MDI"));

        planner.stop(&mut queue, &mut state);
        assert_eq!(order.borrow().as_slice(), ["inner", "outer"]);
        assert_eq!(planner.active_program(), None);
    }

    #[test]
    fn test_repeated_stop_ends_program_once() {
        let mut state = StateStore::new();
        let mut queue = CommandQueue::new();
        let mut planner = adapter(&state);
        let ended = load(&mut planner, &mut state, THREE_BLOCKS);
        drain(&mut planner, &mut queue, &mut state);

        planner.stop(&mut queue, &mut state);
        assert_eq!(ended.borrow().as_slice(), ["Program stop"]);

        // 停止握手中 READY 到达时再次停止，没有程序可结束
        planner.stop(&mut queue, &mut state);
        assert_eq!(ended.borrow().len(), 1);
        assert_eq!(planner.end_program(Some("Program stop"), true, &mut state), 0);
    }

    #[test]
    fn test_load_failure_pops_callback() {
        let mut state = StateStore::new();
        let mut planner = adapter(&state);
        let ended = Rc::new(RefCell::new(Vec::new()));
        let sink = ended.clone();
        let config = planner.kernel_config(&state, true, true);
        let result = planner.load(
            Box::new(move |reason: &str| sink.borrow_mut().push(reason.to_string())),
            ProgramSource::File {
                path: "bad.jsonl".to_string(),
                contents: "garbage".to_string(),
            },
            config,
            &mut state,
        );
        assert!(matches!(result, Err(DriverError::Kernel(_))));
        assert_eq!(ended.borrow().as_slice(), ["Program load failed"]);
        assert_eq!(planner.active_program(), None);
        assert_eq!(state.get("messages").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_report_time() {
        let mut state = StateStore::new();
        let mut planner = adapter(&state);
        let t0 = Instant::now();
        planner.apply(
            Deferred::UpdateTime {
                plan_time: 10.0,
                move_time: 3.0,
            },
            &mut state,
            t0,
        );

        state.set("xx", "RUNNING");
        planner.report_time(t0 + Duration::from_secs(2), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 12.0);

        // 不超过当前运动时长
        planner.report_time(t0 + Duration::from_secs(30), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 13.0);

        state.set("xx", "STOPPING");
        planner.report_time(t0 + Duration::from_secs(1), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 11.0);

        state.set("xx", "HOLDING");
        planner.report_time(t0 + Duration::from_secs(2), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 0.0);

        state.set("xx", "READY");
        planner.report_time(t0 + Duration::from_secs(2), &mut state);
        assert_eq!(state.get_f64("plan_time", -1.0), 0.0);
    }

    #[test]
    fn test_kernel_config() {
        let mut state = StateStore::new();
        state.update([
            ("metric".to_string(), json!(true)),
            ("xvm".to_string(), json!(5000)),
            ("xtn".to_string(), json!(0)),
            ("xtm".to_string(), json!(300)),
            ("ytn".to_string(), json!(10)),
            ("ytm".to_string(), json!(10)),
        ]);
        let settings = PlannerSettings {
            tool_type: Some("PWM Spindle".to_string()),
            rapid_auto_off: true,
            max_deviation: 0.05,
            program_start: Some("G21".to_string()),
            program_end: Some("M5".to_string()),
            ..PlannerSettings::default()
        };
        let planner = PlannerAdapter::new(Box::new(ReplayKernel::new()), settings, &state);

        let config = planner.kernel_config(&state, true, true);
        assert_eq!(config.default_units, Units::Metric);
        assert_eq!(config.max_vel[&Axis::X], 5000.0);
        assert_eq!(config.max_vel[&Axis::Y], 1000.0);
        assert!(config.rapid_auto_off);
        assert!((config.max_arc_error - 0.005).abs() < 1e-12);
        let min = config.min_soft_limit.as_ref().unwrap();
        let max = config.max_soft_limit.as_ref().unwrap();
        assert_eq!((min[&Axis::X], max[&Axis::X]), (0.0, 300.0));
        assert_eq!(min[&Axis::Y], f64::NEG_INFINITY);
        assert_eq!(max[&Axis::Y], f64::INFINITY);
        assert_eq!(config.program_start.as_deref(), Some("G21"));
        assert_eq!(config.overrides.get("M30").map(String::as_str), Some("M5"));
        assert!(!config.overrides.contains_key("M6"));

        let config = planner.kernel_config(&state, false, false);
        assert!(config.min_soft_limit.is_none());
        assert!(config.program_start.is_none());
    }

    #[test]
    fn test_resolve_var() {
        let mut state = StateStore::new();
        state.set("xp", 25.4);
        state.publish();
        let view = state.view();
        assert_eq!(resolve_var(&view, "_xp", Units::Metric), 25.4);
        assert_eq!(resolve_var(&view, "_xp", Units::Imperial), 1.0);
        assert_eq!(resolve_var(&view, "xp", Units::Metric), 0.0);
        assert_eq!(resolve_var(&view, "_missing", Units::Metric), 0.0);
    }
}
