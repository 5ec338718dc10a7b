//! 最近在线时间维护

use crate::im::remote::ProfileRemote;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 上报 last_seen 的默认间隔
pub const LAST_SEEN_INTERVAL: Duration = Duration::from_secs(30);

/// 两分钟内上报过即视为在线
const ONLINE_WINDOW_MINUTES: i64 = 2;

/// 周期性上报最近在线时间
///
/// 启动时立即上报一次，之后按固定间隔上报；停止或释放时取消后台任务。
pub struct LastSeenTracker {
    remote: Arc<dyn ProfileRemote>,
    task: Option<JoinHandle<()>>,
}

impl LastSeenTracker {
    pub fn start(remote: Arc<dyn ProfileRemote>, period: Duration) -> Self {
        info!("[LastSeen] 💓 启动在线状态上报，间隔 {:?}", period);
        let worker = remote.clone();
        let task = tokio::spawn(async move {
            // interval 的第一次 tick 立即完成
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match worker.update_last_seen().await {
                    Ok(()) => debug!("[LastSeen] 已更新 last_seen"),
                    Err(e) => error!("[LastSeen] 更新 last_seen 失败: {}", e),
                }
            }
        });

        Self {
            remote,
            task: Some(task),
        }
    }

    /// 立即上报一次（例如页面重新可见时）
    pub async fn touch(&self) {
        if let Err(e) = self.remote.update_last_seen().await {
            error!("[LastSeen] 更新 last_seen 失败: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("[LastSeen] 停止在线状态上报");
        }
    }
}

impl Drop for LastSeenTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn is_user_online(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_seen.is_some_and(|seen| now - seen < ChronoDuration::minutes(ONLINE_WINDOW_MINUTES))
}

/// 最近在线时间的展示文本
pub fn format_last_seen(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(seen) = last_seen else {
        return "Offline".to_string();
    };

    let minutes = (now - seen).num_minutes();
    if minutes < ONLINE_WINDOW_MINUTES {
        return "Online".to_string();
    }
    if minutes < 60 {
        return format!("Last seen {}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("Last seen {}h ago", hours);
    }
    let days = hours / 24;
    if days < 7 {
        return format!("Last seen {}d ago", days);
    }
    "Offline".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::remote::MemoryBackend;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn formats_relative_time() {
        let at = |mins: i64| Some(now() - ChronoDuration::minutes(mins));
        assert_eq!(format_last_seen(None, now()), "Offline");
        assert_eq!(format_last_seen(at(1), now()), "Online");
        assert_eq!(format_last_seen(at(5), now()), "Last seen 5m ago");
        assert_eq!(format_last_seen(at(180), now()), "Last seen 3h ago");
        assert_eq!(format_last_seen(at(60 * 24 * 3), now()), "Last seen 3d ago");
        assert_eq!(format_last_seen(at(60 * 24 * 8), now()), "Offline");
    }

    #[test]
    fn online_window_is_two_minutes() {
        let seen = now() - ChronoDuration::seconds(119);
        assert!(is_user_online(Some(seen), now()));
        assert!(!is_user_online(Some(now() - ChronoDuration::minutes(2)), now()));
        assert!(!is_user_online(None, now()));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_immediately_then_periodically() {
        let backend = MemoryBackend::new();
        let mut tracker = LastSeenTracker::start(Arc::new(backend.clone()), LAST_SEEN_INTERVAL);
        settle().await;
        assert_eq!(backend.last_seen_updates(), 1);

        tokio::time::advance(LAST_SEEN_INTERVAL).await;
        settle().await;
        assert_eq!(backend.last_seen_updates(), 2);

        tracker.stop();
        assert!(!tracker.is_running());
        tokio::time::advance(LAST_SEEN_INTERVAL * 3).await;
        settle().await;
        assert_eq!(backend.last_seen_updates(), 2);
    }

    #[tokio::test]
    async fn touch_reports_once() {
        let backend = MemoryBackend::new();
        let tracker = LastSeenTracker::start(Arc::new(backend.clone()), Duration::from_secs(3600));
        settle().await;
        tracker.touch().await;
        assert_eq!(backend.last_seen_updates(), 2);
    }
}
