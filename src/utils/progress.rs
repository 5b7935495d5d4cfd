use std::sync::Arc;

/// 进度回调，参数为 0..=100 的百分比
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// 进度上报器
///
/// 每次上传会话创建一个。上报的值单调不减，完成时恰好上报一次 100。
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: Option<u8>,
    completed: bool,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: None,
            completed: false,
        }
    }

    /// 上报百分比，低于上一次的值会被抬到上一次的值
    pub fn report(&mut self, percent: u8) {
        if self.completed {
            return;
        }

        let percent = percent.min(100).max(self.last.unwrap_or(0));
        self.last = Some(percent);

        if let Some(ref callback) = self.callback {
            callback(percent);
        }
    }

    /// 按已上传字节上报
    pub fn report_bytes(&mut self, uploaded: u64, total: u64) {
        self.report(percentage(uploaded, total));
    }

    /// 上传完成，上报 100
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }

        self.last = Some(100);
        self.completed = true;

        if let Some(ref callback) = self.callback {
            callback(100);
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

/// `floor(uploaded / total * 100)`，空文件视为已完成
pub fn percentage(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }

    let percent = (uploaded.min(total) as u128 * 100) / total as u128;
    percent as u8
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
