//! 控制器
//!
//! 持有机床状态、串口链路、同步命令队列和规划适配器，
//! 把 MCU 上报分发到队列释放与内核反馈，并在链路可写时拉取下一个发送单元。
//!
//! # 发送顺序
//!
//! 1. 未写完的单元（部分写入从断点继续）
//! 2. 控制队列（resume、help、dump、set_axis、estop 等），优先于规划输出
//! 3. 规划器输出（仅在规划运行且机床未暂停时）
//!
//! # 急停锁存
//!
//! 主机发出急停或 MCU 上报 `ESTOPPED` 后忽略所有上报，直到 MCU 重启并发送
//! `firmware` 消息。
//!
//! # 运行周期
//!
//! 程序（`running`）、回零（`homing`）与点动（`jogging`）按启动顺序排队，
//! 队首决定状态中的 `cycle`。点动与其它周期互斥。程序周期在规划器结束程序时
//! 出队，点动周期在 MCU 上报 `jd`（已结束的点动编号）时出队。

use crate::config::AxisHoming;
use crate::error::DriverError;
use crate::homing;
use crate::planner::{Deferred, PlannerAdapter, ProgramSource};
use crate::queue::CommandQueue;
use crate::resolver::PathResolver;
use crate::state::{MachineStatus, StateChange, StateStore, StateView};
use crossbeam_channel::{Receiver, Sender, unbounded};
use gantry_link::{Link, LinkEvent, LinkState};
use gantry_protocol::command::{self, PauseKind};
use gantry_protocol::report::{
    DRV8711_FAULT_MASK, DRV8711_MASK, LogLevel, LogRecord, MOTOR_COUNT, Update,
    driver_flags_to_string, position_var,
};
use gantry_protocol::{Axis, AxisVector, LineBuffer, McuMessage};
use semver::{Version, VersionReq};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::RawFd;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 暂停原因（MCU 上报的 `pr`）
const PAUSE_SWITCH_FOUND: &str = "Switch found";
const PAUSE_SWITCH_NOT_FOUND: &str = "Switch not found";
const PAUSE_USER_STOP: &str = "User stop";
const PAUSE_OPTIONAL: &str = "Optional pause";

/// 运行周期（状态中的 `cycle`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Idle,
    Running,
    Homing,
    Jogging,
}

impl Cycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Cycle::Idle => "idle",
            Cycle::Running => "running",
            Cycle::Homing => "homing",
            Cycle::Jogging => "jogging",
        }
    }
}

enum CycleEntry {
    Program(Cycle),
    Jog(u16),
}

impl CycleEntry {
    fn cycle(&self) -> Cycle {
        match self {
            CycleEntry::Program(cycle) => *cycle,
            CycleEntry::Jog(_) => Cycle::Jogging,
        }
    }
}

/// 16 位点动编号的回绕比较：`a` 早于 `b`
fn id16_less(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// 正在发送的单元
struct PendingWrite {
    data: Vec<u8>,
    offset: usize,
}

impl PendingWrite {
    fn new(unit: String) -> Self {
        Self {
            data: unit.into_bytes(),
            offset: 0,
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }
}

pub struct Controller {
    link: Link,
    state: StateStore,
    queue: CommandQueue<Deferred>,
    planner: PlannerAdapter,
    resolver: Box<dyn PathResolver>,
    firmware_req: Option<VersionReq>,
    decoder: LineBuffer,
    control: VecDeque<String>,
    current: Option<PendingWrite>,
    estop_latched: bool,
    stopping: bool,
    unpausing: bool,
    last_motor_flags: [u32; MOTOR_COUNT as usize],
    homing: BTreeMap<Axis, AxisHoming>,
    cycles: VecDeque<CycleEntry>,
    next_jog_id: u16,
    program_end_tx: Sender<()>,
    program_end_rx: Receiver<()>,
}

impl Controller {
    pub fn new(
        link: Link,
        planner: PlannerAdapter,
        state: StateStore,
        resolver: Box<dyn PathResolver>,
        firmware_req: Option<VersionReq>,
        homing: BTreeMap<Axis, AxisHoming>,
    ) -> Self {
        let (program_end_tx, program_end_rx) = unbounded();
        let mut controller = Self {
            link,
            state,
            queue: CommandQueue::new(),
            planner,
            resolver,
            firmware_req,
            decoder: LineBuffer::new(),
            control: VecDeque::new(),
            current: None,
            estop_latched: false,
            stopping: false,
            unpausing: false,
            last_motor_flags: [0; MOTOR_COUNT as usize],
            homing,
            cycles: VecDeque::new(),
            next_jog_id: 1,
            program_end_tx,
            program_end_rx,
        };
        controller.update_cycle();
        controller.publish();
        controller
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn view(&self) -> StateView {
        self.state.view()
    }

    pub fn subscribe(&mut self) -> Receiver<StateChange> {
        self.state.subscribe()
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.link.raw_fd()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.link.next_deadline()
    }

    pub fn is_estop_latched(&self) -> bool {
        self.estop_latched
    }

    /// 规划中或仍有未确认的指令
    pub fn is_busy(&self) -> bool {
        self.planner.is_busy(&self.queue)
    }

    pub fn cycle(&self) -> Cycle {
        self.cycles.front().map_or(Cycle::Idle, CycleEntry::cycle)
    }

    /// 把本轮的状态变化发布到快照
    pub fn publish(&mut self) {
        self.state.publish();
    }

    // ========================================================================
    // 链路驱动
    // ========================================================================

    /// 打开链路（失败时链路自行安排重连）
    pub fn open(&mut self, now: Instant) {
        if let Err(e) = self.link.open(now) {
            debug!("Initial open failed: {}", e);
        }
        self.handle_link_events();
        self.pump(now);
    }

    pub fn close(&mut self) {
        self.planner.close();
        self.link.close();
        self.handle_link_events();
        self.publish();
    }

    /// 读取并处理所有可读数据
    pub fn on_readable(&mut self, now: Instant) {
        let data = self.link.read_available(now);
        if !data.is_empty() {
            for line in self.decoder.push(&data) {
                self.handle_line(&line, now);
            }
        }
        self.handle_link_events();
        self.pump(now);
    }

    /// 处理到期的链路计时器
    pub fn on_timer(&mut self, now: Instant) {
        self.link.on_timer(now);
        self.handle_link_events();
        // 读写方向可能刚从退避中恢复
        self.on_readable(now);
    }

    /// 周期性进度上报
    pub fn tick(&mut self, now: Instant) {
        self.planner.report_time(now, &mut self.state);
        self.publish();
    }

    /// 在链路可写时尽可能多地发送
    pub fn pump(&mut self, now: Instant) {
        while self.link.can_write() {
            if self.current.is_none() {
                self.current = self.next_unit().map(PendingWrite::new);
            }
            let Some(pending) = self.current.as_mut() else {
                break;
            };

            let written = self.link.write(now, pending.remaining());
            if written == 0 {
                break;
            }
            pending.offset += written;
            if pending.is_done() {
                self.current = None;
            }
        }
        self.handle_link_events();
        self.reap_programs();
        self.publish();
    }

    fn next_unit(&mut self) -> Option<String> {
        if let Some(unit) = self.control.pop_front() {
            return Some(unit);
        }
        if self.can_plan() {
            return self.planner.next(&mut self.queue, &mut self.state);
        }
        None
    }

    fn can_plan(&self) -> bool {
        self.planner.is_running()
            && !self.estop_latched
            && (self.state.status() != MachineStatus::Holding || self.unpausing)
    }

    fn queue_control(&mut self, body: &str) {
        debug!("Control: {}", body);
        self.control.push_back(command::frame_control(body));
    }

    /// 点动与其它周期互斥
    fn check_cycle(&self, requested: Cycle) -> Result<(), DriverError> {
        if let Some(last) = self.cycles.back() {
            let active = last.cycle();
            if active != requested && (active == Cycle::Jogging || requested == Cycle::Jogging) {
                return Err(DriverError::CycleConflict {
                    requested: requested.as_str(),
                    active: active.as_str(),
                });
            }
        }
        Ok(())
    }

    fn update_cycle(&mut self) {
        let cycle = self.cycle();
        self.state.set("cycle", cycle.as_str());
    }

    /// 规划器结束的程序周期出队
    fn reap_programs(&mut self) {
        let ended = self.program_end_rx.try_iter().count();
        if ended == 0 {
            return;
        }
        for _ in 0..ended {
            let Some(index) = self
                .cycles
                .iter()
                .position(|entry| matches!(entry, CycleEntry::Program(_)))
            else {
                break;
            };
            self.cycles.remove(index);
        }
        self.update_cycle();
    }

    fn clear_cycles(&mut self) {
        self.program_end_rx.try_iter().for_each(drop);
        self.cycles.clear();
        self.update_cycle();
    }

    /// MCU 结束了编号不晚于 `id` 的点动
    fn end_jog(&mut self, id: u16) {
        if id == 0 {
            return;
        }
        match self.cycles.front() {
            Some(CycleEntry::Jog(first)) if !id16_less(id, *first) => {},
            _ => {
                warn!("End jog mismatch: {}", id);
                return;
            },
        }
        while let Some(CycleEntry::Jog(first)) = self.cycles.front() {
            if id16_less(id, *first) {
                break;
            }
            self.cycles.pop_front();
        }
        self.update_cycle();
    }

    fn handle_link_events(&mut self) {
        for event in self.link.take_events() {
            match event {
                LinkEvent::StateChanged { from, to, reason } => {
                    info!("Link {} -> {}", from.as_str(), to.as_str());
                    self.state.set("link_state", to.as_str());
                    match to {
                        LinkState::Open => {
                            self.state.set("link_error", Value::Null);
                            self.connect();
                        },
                        LinkState::Faulted => {
                            if let Some(reason) = reason {
                                self.state.set("link_error", reason);
                            }
                            self.current = None;
                            self.control.clear();
                            self.decoder.clear();
                        },
                        LinkState::Closed | LinkState::Opening => {},
                    }
                },
                LinkEvent::ReconnectScheduled { delay } => {
                    debug!("Reconnect in {:?}", delay);
                },
            }
        }
    }

    fn connect(&mut self) {
        self.queue_control(command::RESUME);
        self.queue_control(command::HELP);
    }

    // ========================================================================
    // MCU 上报
    // ========================================================================

    fn handle_line(&mut self, line: &str, now: Instant) {
        let message = match McuMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring MCU report: {}", e);
                return;
            },
        };

        if self.estop_latched && !matches!(message, McuMessage::Firmware(_)) {
            return;
        }

        let firmware_version = message.firmware_version().map(str::to_string);
        match message {
            McuMessage::Variables(vars) => {
                let position = self.state.position();
                self.state.set_machine_vars(vars);
                self.queue_control(command::DUMP);
                for (axis, value) in position {
                    self.queue_set_axis(axis, value);
                }
            },
            McuMessage::Log(record) => self.handle_log(record),
            McuMessage::Firmware(_) => self.handle_firmware(firmware_version.as_deref()),
            McuMessage::Update(update) => self.handle_update(update, now),
        }
    }

    fn queue_set_axis(&mut self, axis: Axis, position: f64) {
        match command::set_axis(axis, position) {
            Ok(body) => self.queue_control(&body),
            Err(e) => warn!("Cannot restore {} position: {}", axis, e),
        }
    }

    fn handle_log(&mut self, record: LogRecord) {
        let location = record.location.as_deref().unwrap_or("");
        match record.level {
            LogLevel::Debug => debug!(target: "operator", location, "{}", record.msg),
            LogLevel::Info => info!(target: "operator", location, "{}", record.msg),
            LogLevel::Warning => warn!(target: "operator", location, "{}", record.msg),
            LogLevel::Error => error!(target: "operator", location, "{}", record.msg),
        }

        if record.is_fatal() {
            error!("MCU reported error, resetting: {}", record.msg);
            self.reset();
        }
    }

    fn handle_firmware(&mut self, version: Option<&str>) {
        info!("Firmware rebooted: {}", version.unwrap_or("unknown version"));
        self.estop_latched = false;
        self.stopping = false;
        self.unpausing = false;
        self.last_motor_flags = [0; MOTOR_COUNT as usize];
        self.planner.reset(&mut self.queue, &mut self.state);
        self.clear_cycles();

        if let Some(req) = &self.firmware_req {
            let compatible = version
                .and_then(|v| Version::parse(v.trim_start_matches('v')).ok())
                .is_some_and(|v| req.matches(&v));
            if !compatible {
                error!(
                    target: "operator",
                    "Firmware version {} does not satisfy {}",
                    version.unwrap_or("unknown"),
                    req
                );
                return;
            }
        }

        if let Some(version) = version {
            self.state.set("firmware_version", version);
        }
        self.connect();
    }

    fn handle_update(&mut self, update: Update, now: Instant) {
        self.check_motor_flags(&update);

        let previous = self.state.status();
        let id = update.id();
        let jog_done = update.jog_done();
        let result = update.result().cloned();
        let change = self.state.update(update.values);

        if let Some(id) = id {
            self.planner.set_active(id);
            for action in self.queue.release(id) {
                self.planner.apply(action, &mut self.state, now);
            }
        }

        if let Some(result) = result {
            self.planner.result(&result);
        }

        if let Some(jog_id) = jog_done {
            self.end_jog(jog_id);
        }

        if change.contains("xx") {
            self.on_status_change(previous, self.state.status());
        }
    }

    fn check_motor_flags(&mut self, update: &Update) {
        for (motor, flags) in update.motor_flags() {
            let flags = flags & DRV8711_MASK;
            let Some(last) = self.last_motor_flags.get_mut(motor as usize) else {
                continue;
            };
            if *last == flags {
                continue;
            }
            *last = flags;

            if flags & DRV8711_FAULT_MASK != 0 {
                error!(
                    target: "operator",
                    "Motor {} fault: {}",
                    motor,
                    driver_flags_to_string(flags)
                );
            } else if flags != 0 {
                warn!("Motor {} driver flags: {}", motor, driver_flags_to_string(flags));
            } else {
                info!("Motor {} driver flags cleared", motor);
            }
        }
    }

    fn on_status_change(&mut self, previous: MachineStatus, status: MachineStatus) {
        debug!("Machine state {:?} -> {:?}", previous, status);

        if status != MachineStatus::Holding {
            self.unpausing = false;
        }

        match status {
            MachineStatus::Estopped => {
                // MCU 侧急停同样锁存，直到固件重启
                warn!(target: "operator", "Machine estopped");
                self.stopping = false;
                self.planner.reset(&mut self.queue, &mut self.state);
                self.clear_cycles();
                self.estop_latched = true;
            },
            MachineStatus::Ready if self.stopping => {
                self.planner.stop(&mut self.queue, &mut self.state);
                self.state.set("line", 0);
                self.stopping = false;
            },
            MachineStatus::Holding if previous != MachineStatus::Holding => {
                self.queue_control(command::FLUSH);
                self.queue_control(command::RESUME);
                self.on_hold();
            },
            _ => {},
        }
    }

    fn on_hold(&mut self) {
        let reason = self.state.get_str("pr").unwrap_or("").to_string();
        info!(target: "operator", "Paused: {}", reason);

        match reason.as_str() {
            PAUSE_SWITCH_NOT_FOUND => {
                error!(target: "operator", "Switch not found");
                self.planner.stop(&mut self.queue, &mut self.state);
                self.state.set("line", 0);
            },
            PAUSE_USER_STOP => {
                self.planner.stop(&mut self.queue, &mut self.state);
                self.state.set("line", 0);
                self.send_unpause();
            },
            PAUSE_SWITCH_FOUND => {
                self.restart_planner();
                self.send_unpause();
            },
            PAUSE_OPTIONAL if !self.state.get_bool("optional_pause") => {
                self.restart_planner();
                self.send_unpause();
            },
            _ => {},
        }
    }

    fn send_unpause(&mut self) {
        self.queue_control(command::UNPAUSE);
        self.unpausing = true;
    }

    fn restart_planner(&mut self) {
        let id = self.state.get_f64("id", 0.0) as u32;
        let position = self.state.position();
        self.planner
            .restart(id, &position, &mut self.queue, &mut self.state);
    }

    // ========================================================================
    // 操作员指令
    // ========================================================================

    /// 加载上传目录中的程序
    pub fn start(&mut self, path: &str, now: Instant) -> Result<(), DriverError> {
        let contents = self.resolver.read(path)?;
        self.load(
            ProgramSource::File {
                path: path.to_string(),
                contents,
            },
            Cycle::Running,
            true,
            now,
        )
    }

    /// 手动输入（MDI）
    pub fn mdi(&mut self, text: &str, now: Instant) -> Result<(), DriverError> {
        self.load(ProgramSource::Mdi(text.to_string()), Cycle::Running, true, now)
    }

    fn load(
        &mut self,
        source: ProgramSource,
        cycle: Cycle,
        with_limits: bool,
        now: Instant,
    ) -> Result<(), DriverError> {
        self.check_not_estopped()?;
        self.check_cycle(cycle)?;
        if self.is_busy() {
            return Err(DriverError::Busy(format!(
                "cannot start {} while a program is running",
                source.label()
            )));
        }

        let with_start = !source.is_text();
        let config = self.planner.kernel_config(&self.state, with_start, with_limits);
        let ended = self.program_end_tx.clone();
        let result = self.planner.load(
            Box::new(move |reason: &str| {
                debug!("Program finished: {}", reason);
                let _ = ended.send(());
            }),
            source,
            config,
            &mut self.state,
        );
        // 加载失败时回调已被调用
        self.reap_programs();
        result?;

        self.cycles.push_back(CycleEntry::Program(cycle));
        self.update_cycle();
        self.pump(now);
        Ok(())
    }

    fn check_not_estopped(&self) -> Result<(), DriverError> {
        if self.estop_latched || self.state.status() == MachineStatus::Estopped {
            return Err(DriverError::Busy("machine is estopped".to_string()));
        }
        Ok(())
    }

    /// 回零
    ///
    /// `axis` 为 `None` 时按 z x y a b c 的顺序回零所有可回零的轴；
    /// 手动回零的轴把当前位置设为 `position`。
    pub fn home(
        &mut self,
        axis: Option<Axis>,
        position: Option<f64>,
        now: Instant,
    ) -> Result<(), DriverError> {
        self.check_not_estopped()?;
        self.check_cycle(Cycle::Homing)?;
        if self.is_busy() {
            return Err(DriverError::Busy(
                "cannot home while a program is running".to_string(),
            ));
        }
        let plan = homing::homing_plan(&self.state, &self.homing, axis, position)?;
        self.state.update(plan.vars);
        self.load(ProgramSource::Mdi(plan.program), Cycle::Homing, false, now)
    }

    /// 取消回零
    pub fn unhome(&mut self, axis: Axis, now: Instant) -> Result<(), DriverError> {
        self.mdi(&format!("G28.2 {axis}0"), now)
    }

    /// 点动，每轴速度为最大速度的比例（-1..=1）
    pub fn jog(&mut self, axes: &AxisVector, now: Instant) -> Result<(), DriverError> {
        self.check_not_estopped()?;
        self.check_cycle(Cycle::Jogging)?;

        let id = self.next_jog_id;
        let body = command::jog(id, axes)?;
        self.next_jog_id = if id == u16::MAX { 1 } else { id + 1 };

        self.queue_control(&body);
        self.cycles.push_back(CycleEntry::Jog(id));
        self.update_cycle();
        self.pump(now);
        Ok(())
    }

    /// 设置轴位置
    ///
    /// 已回零的轴只修改坐标偏移（`G92`），否则空闲时直接改写绝对位置。
    pub fn set_position(&mut self, axis: Axis, position: f64, now: Instant) -> Result<(), DriverError> {
        if !position.is_finite() {
            return Err(DriverError::InvalidRequest(format!(
                "{axis} position must be finite"
            )));
        }

        if self.state.is_axis_homed(axis) {
            return self.mdi(&format!("G92 {axis}{position:.6}"), now);
        }

        if self.cycle() != Cycle::Idle || self.is_busy() {
            return Err(DriverError::Busy(
                "cannot set position while not idle".to_string(),
            ));
        }
        info!(target: "operator", "Set {} position to {}", axis, position);
        self.state.set(&position_var(axis), position);
        self.planner.set_position(&self.state.position());
        self.queue_set_axis(axis, position);
        self.pump(now);
        Ok(())
    }

    /// 进给倍率（`fo`）
    pub fn override_feed(&mut self, value: f64, now: Instant) -> Result<(), DriverError> {
        self.set_override("fo", value, now)
    }

    /// 主轴转速倍率（`so`）
    pub fn override_speed(&mut self, value: f64, now: Instant) -> Result<(), DriverError> {
        self.set_override("so", value, now)
    }

    fn set_override(&mut self, code: &str, value: f64, now: Instant) -> Result<(), DriverError> {
        if !value.is_finite() || value < 0.0 {
            return Err(DriverError::InvalidRequest(format!(
                "override {code} out of range: {value}"
            )));
        }
        self.queue_control(&command::set(code, value));
        self.pump(now);
        Ok(())
    }

    /// 立即设置 MCU 变量（`$code=value`）
    pub fn set(&mut self, code: &str, value: &str, now: Instant) -> Result<(), DriverError> {
        let valid_code =
            !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_code || value.is_empty() || value.contains(char::is_whitespace) {
            return Err(DriverError::InvalidRequest(format!(
                "cannot set {code:?} to {value:?}"
            )));
        }
        self.queue_control(&command::set(code, value));
        self.pump(now);
        Ok(())
    }

    /// 停止程序
    ///
    /// 点动中只发送停止，点动周期在 MCU 上报 `jd` 后结束。
    pub fn stop(&mut self, now: Instant) {
        info!(target: "operator", "Stop");
        if self.cycle() != Cycle::Jogging {
            self.planner.stop(&mut self.queue, &mut self.state);
            self.stopping = true;
        }
        self.queue_control(command::STOP);
        self.pump(now);
    }

    /// 从最近确认的位置重新规划
    pub fn restart(&mut self, now: Instant) {
        self.restart_planner();
        self.pump(now);
    }

    /// 完全复位
    pub fn reset(&mut self) {
        self.stopping = false;
        self.unpausing = false;
        self.planner.reset(&mut self.queue, &mut self.state);
        self.clear_cycles();
        self.publish();
    }

    /// 急停：丢弃所有待发数据，立即发送急停
    pub fn estop(&mut self, now: Instant) {
        if self.estop_latched || self.state.status() == MachineStatus::Estopped {
            return;
        }
        warn!(target: "operator", "Emergency stop");

        self.current = None;
        self.control.clear();
        self.link.flush_output();
        self.queue_control(command::ESTOP);
        self.reset();
        self.estop_latched = true;
        self.pump(now);
    }

    /// 解除急停
    pub fn clear(&mut self, now: Instant) {
        if self.estop_latched || self.state.status() == MachineStatus::Estopped {
            info!(target: "operator", "Clear estop");
            self.queue_control(command::CLEAR);
            self.pump(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        info!(target: "operator", "Pause");
        self.queue_control(&command::pause(PauseKind::User));
        self.pump(now);
    }

    /// 继续：从已确认位置重新规划后解除暂停
    pub fn unpause(&mut self, now: Instant) {
        if self.state.status() != MachineStatus::Holding || self.unpausing {
            return;
        }
        info!(target: "operator", "Unpause");
        self.restart_planner();
        self.send_unpause();
        self.pump(now);
    }

    /// 是否在可选暂停（M1）处停下
    pub fn optional_pause(&mut self, enable: bool) {
        self.state.set("optional_pause", enable);
        self.publish();
    }

    pub fn ack_message(&mut self, id: u64) -> bool {
        let removed = self.state.ack_message(id);
        self.publish();
        removed
    }

    /// 重启 MCU
    pub fn reboot(&mut self, now: Instant) {
        info!(target: "operator", "Reboot MCU");
        self.queue_control(command::REBOOT);
        self.pump(now);
    }
}
