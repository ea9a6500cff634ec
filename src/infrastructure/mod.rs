//! 基础设施层：持有浏览器资源，只暴露自动化能力

pub mod cert_proxy;
pub mod chrome;
pub mod http;
pub mod scripted;
pub mod scripts;
pub mod surface;

pub use chrome::ChromeSurface;
pub use http::DirectFetcher;
pub use scripted::{CaptureScript, PopupScript, ScriptedFactory, ScriptedSurface};
pub use surface::{
    AutomationSurface, CaptureChannels, CellSnapshot, Clickable, DownloadEvent, ElementHandle,
    HttpPayload, Locator, PopupHandle, RowLink, RowSnapshot, SessionFactory, SessionSpec,
    TableSnapshot,
};
