use std::fmt;
use std::io::Write;

/// 进度所处的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Reindex { pass: u32 },
    WaitRefresh { pass: u32 },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Reindex { pass } => write!(f, "reindex #{}", pass),
            Phase::WaitRefresh { pass } => write!(f, "wait refresh #{}", pass),
        }
    }
}

/// 人类可读进度的输出端。编排器每拿到一个已处理数就调用一次 `advance`。
pub trait ProgressSink {
    fn begin(&mut self, phase: Phase, total: u64);
    fn advance(&mut self, processed: u64);
    fn finish(&mut self);
}

/// 在 stderr 上原地刷新的一行进度条
pub struct ConsoleProgress<W: Write = std::io::Stderr> {
    out: W,
    phase: Option<Phase>,
    total: u64,
    width: usize,
}

impl ConsoleProgress {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            phase: None,
            total: 0,
            width: 28,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&self, processed: u64) -> String {
        let phase = self.phase.map(|p| p.to_string()).unwrap_or_default();
        if self.total == 0 {
            return format!("{:<18} {:>10}", phase, processed);
        }
        let ratio = (processed as f64 / self.total as f64).min(1.0);
        let filled = (ratio * self.width as f64).round() as usize;
        format!(
            "{:<18} [{}{}] {:>10}/{:<10} {:>5.1}%",
            phase,
            "=".repeat(filled),
            " ".repeat(self.width - filled),
            processed,
            self.total,
            ratio * 100.0
        )
    }
}

impl<W: Write> ProgressSink for ConsoleProgress<W> {
    fn begin(&mut self, phase: Phase, total: u64) {
        self.phase = Some(phase);
        self.total = total;
        let line = self.render(0);
        let _ = write!(self.out, "\r{}", line);
        let _ = self.out.flush();
    }

    fn advance(&mut self, processed: u64) {
        let line = self.render(processed);
        let _ = write!(self.out, "\r{}", line);
        let _ = self.out.flush();
    }

    fn finish(&mut self) {
        let _ = writeln!(self.out);
        let _ = self.out.flush();
        self.phase = None;
    }
}

/// 测试用：记录所有调用
#[cfg(test)]
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Vec<(Phase, u64)>,
    pub values: Vec<(Phase, u64)>,
    pub finished: usize,
    current: Option<Phase>,
}

#[cfg(test)]
impl RecordingProgress {
    pub fn values_for(&self, phase: Phase) -> Vec<u64> {
        self.values
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, v)| *v)
            .collect()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingProgress {
    fn begin(&mut self, phase: Phase, total: u64) {
        self.events.push((phase, total));
        self.current = Some(phase);
    }

    fn advance(&mut self, processed: u64) {
        if let Some(phase) = self.current {
            self.values.push((phase, processed));
        }
    }

    fn finish(&mut self) {
        self.finished += 1;
        self.current = None;
    }
}
