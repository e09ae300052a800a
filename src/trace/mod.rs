//! 运行轨迹持久化
//!
//! 终态时把整个 WorkflowState（计划、全部结果、反馈与重规划决策）无损序列化到
//! `<base>/runs/<run_id>/trace.json`，另存 metadata.json 便于列表浏览；事后排查用。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::workflow::state::WorkflowState;

/// 运行元数据（runs 列表用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub request: String,
    pub phase: String,
    pub total_results: usize,
    pub replans: usize,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// 轨迹存储：管理 <base>/runs 目录
pub struct TraceStorage {
    base_dir: PathBuf,
    runs_dir: PathBuf,
}

impl TraceStorage {
    pub fn new(base_dir: impl AsRef<Path>) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let runs_dir = base_dir.join("runs");
        fs::create_dir_all(&runs_dir)?;

        // 轨迹不入库
        let gitignore = base_dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "runs/\n*.log\n")?;
        }

        Ok(Self { base_dir, runs_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 保存一次运行的完整状态，返回运行目录
    pub fn save_run(&self, state: &WorkflowState) -> io::Result<PathBuf> {
        let run_dir = self.runs_dir.join(&state.run_id);
        fs::create_dir_all(&run_dir)?;

        let trace_json = serde_json::to_string_pretty(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(run_dir.join("trace.json"), trace_json)?;

        let metadata = RunMetadata {
            run_id: state.run_id.clone(),
            request: state.plan.original_request.clone(),
            phase: format!("{:?}", state.phase).to_lowercase(),
            total_results: state.history.len(),
            replans: state.superseded_plans.len(),
            started_at: state.started_at,
            finished_at: state.finished_at,
        };
        let meta_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(run_dir.join("metadata.json"), meta_json)?;

        Ok(run_dir)
    }

    /// 读回一次运行的完整状态
    pub fn load_run(&self, run_id: &str) -> io::Result<WorkflowState> {
        let path = self.runs_dir.join(run_id).join("trace.json");
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// 按开始时间倒序列出最近的运行
    pub fn list_runs(&self, limit: usize) -> Vec<RunMetadata> {
        let mut runs = Vec::new();
        let Ok(entries) = fs::read_dir(&self.runs_dir) else {
            return runs;
        };
        for entry in entries.flatten() {
            let meta_path = entry.path().join("metadata.json");
            if let Ok(raw) = fs::read_to_string(meta_path) {
                if let Ok(meta) = serde_json::from_str::<RunMetadata>(&raw) {
                    runs.push(meta);
                }
            }
        }
        runs.sort_by_key(|m| std::cmp::Reverse(m.started_at));
        runs.truncate(limit);
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::RunPhase;
    use crate::workflow::task::{Plan, Task, TaskKind, TaskResult};

    fn state() -> WorkflowState {
        let plan = Plan::new(
            "create calculator and commit",
            vec![Task::new("a", TaskKind::CodeGeneration, "create calculator.py")],
        );
        let mut state = WorkflowState::new(plan);
        state.phase = RunPhase::Completed;
        state.record_result(TaskResult::failed("a", "first attempt failed"));
        state.finished_at = Some(state.started_at + 42);
        state
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();
        let state = state();

        let run_dir = storage.save_run(&state).unwrap();
        assert!(run_dir.join("trace.json").exists());
        assert!(run_dir.join("metadata.json").exists());

        let loaded = storage.load_run(&state.run_id).unwrap();
        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.plan.original_request, state.plan.original_request);
        assert_eq!(loaded.phase, RunPhase::Completed);
    }

    #[test]
    fn test_gitignore_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let _ = TraceStorage::new(dir.path()).unwrap();
        let gitignore = dir.path().join(".gitignore");
        assert!(gitignore.exists());
        let content = std::fs::read_to_string(&gitignore).unwrap();
        assert!(content.contains("runs/"));
    }

    #[test]
    fn test_list_runs_sorted_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TraceStorage::new(dir.path()).unwrap();

        let mut first = state();
        first.started_at = 1000;
        let mut second = state();
        second.run_id = "second-run".to_string();
        second.started_at = 2000;

        storage.save_run(&first).unwrap();
        storage.save_run(&second).unwrap();

        let runs = storage.list_runs(10);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "second-run");
    }
}
