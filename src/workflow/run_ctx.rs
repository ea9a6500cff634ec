//! 任务运行上下文
//!
//! 封装一次任务目录内唯一的可变状态：文件序号和已创建的分类目录。
//! 同一任务目录下的多个分类共用一个上下文，序号在整个目录内单调递增。

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StorageError;
use crate::models::Category;
use crate::services::download_capture::CapturedFile;
use crate::services::file_store;

/// 任务运行上下文
#[derive(Debug, Clone)]
pub struct RunContext {
    /// 任务根目录 `{base}/jobs/{period}/{timestamp}[/{account}]`
    job_root: PathBuf,

    /// 最后一个已写入文件的序号（从 1 开始分配）
    last_sequence: usize,

    /// 已创建的分类目录
    created_dirs: HashSet<PathBuf>,

    /// 已写入的文件
    files: Vec<PathBuf>,
}

impl RunContext {
    pub fn new(job_root: impl Into<PathBuf>) -> Self {
        Self {
            job_root: job_root.into(),
            last_sequence: 0,
            created_dirs: HashSet::new(),
            files: Vec::new(),
        }
    }

    pub fn job_root(&self) -> &Path {
        &self.job_root
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.job_root.join(category.slug())
    }

    pub fn last_sequence(&self) -> usize {
        self.last_sequence
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// 创建任务根目录（分类目录不在这里创建）
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        file_store::ensure_dir(&self.job_root).await
    }

    /// 写入一个文件
    ///
    /// 分类目录在第一次写入前才创建；写入成功后序号才前进，失败不会留下空号。
    pub async fn store(
        &mut self,
        category: Category,
        token: &str,
        file: &CapturedFile,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.category_dir(category);
        if !self.created_dirs.contains(&dir) {
            file_store::ensure_dir(&dir).await?;
            info!("📁 创建分类目录: {}", dir.display());
            self.created_dirs.insert(dir.clone());
        }

        let sequence = self.last_sequence + 1;
        let dest = dir.join(file_store::file_name(category, token, sequence, file.extension));
        file_store::write_atomic(&dest, &file.bytes).await?;

        self.last_sequence = sequence;
        self.files.push(dest.clone());
        Ok(dest)
    }
}

impl Display for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[任务 {} 序号#{}]",
            self.job_root.display(),
            self.last_sequence
        )
    }
}
