use chrono::{DateTime, Local};

use crate::models::job::ExecutionMode;

/// 运行结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Sucesso,
    Erro,
    Simulado,
    Parcial,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Sucesso => "sucesso",
            RunStatus::Erro => "erro",
            RunStatus::Simulado => "simulado",
            RunStatus::Parcial => "parcial",
        }
    }
}

/// 执行记录，每次任务运行结束时写入一次
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub owner: String,
    pub account_id: String,
    pub account_name: String,
    pub mode: ExecutionMode,
    pub total_files: usize,
    pub status: RunStatus,
    pub detail: String,
    pub timestamp: DateTime<Local>,
}
