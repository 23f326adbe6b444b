use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// 任务进度通知
///
/// 后台任务进入终态时按发起用户推送事件；通知失败只记录日志，不影响任务结果。
pub trait TaskNotifier: Send + Sync + fmt::Debug {
    fn notify(&self, user_id: i64, event: &str, payload: Value);
}

/// 不发送任何通知
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

impl TaskNotifier for NoopNotifier {
    fn notify(&self, _user_id: i64, _event: &str, _payload: Value) {}
}

/// 只写日志，用于命令行等没有推送通道的场景
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl TaskNotifier for LogNotifier {
    fn notify(&self, user_id: i64, event: &str, payload: Value) {
        tracing::info!("通知用户 {}: {} {}", user_id, event, payload);
    }
}

/// 一条通知事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub user_id: i64,
    pub event: String,
    pub payload: Value,
}

/// 把事件投递到通道，由上层（如 WebSocket 推送）消费
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskNotifier for ChannelNotifier {
    fn notify(&self, user_id: i64, event: &str, payload: Value) {
        let event = TaskEvent {
            user_id,
            event: event.to_string(),
            payload,
        };
        if self.sender.send(event).is_err() {
            tracing::debug!("通知接收端已关闭，丢弃事件");
        }
    }
}
