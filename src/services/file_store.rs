//! 文件落盘服务 - 业务能力层
//!
//! 只负责“文件叫什么、扩展名对不对、怎么安全写入”，不关心流程

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::fs;
use tracing::debug;

use crate::error::{CaptureError, StorageError};
use crate::models::{Category, DocFormat};

/// 访问密钥：44-50 位连续数字
static ACCESS_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{44,50}\b").expect("access key regex"));

/// 格式化的 CNPJ / CPF
static DOCUMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}|\d{3}\.\d{3}\.\d{3}-\d{2}").expect("document regex")
});

/// 确定最终扩展名
///
/// 优先看建议文件名的扩展名；没有扩展名时看 content-type；都没有就用请求的格式。
/// 任何一处与请求格式矛盾都直接拒绝。
pub fn resolve_extension(
    suggested_name: Option<&str>,
    content_type: Option<&str>,
    format: DocFormat,
) -> Result<&'static str, CaptureError> {
    let expected = format.extension();

    if let Some(ext) = suggested_name.and_then(name_extension) {
        return if DocFormat::from_extension(&ext) == Some(format) {
            Ok(expected)
        } else {
            Err(CaptureError::mismatch(expected, format!(".{}", ext)))
        };
    }

    if let Some(ct) = content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
        // 网页（含 xhtml+xml 的登录页、错误页）先于格式匹配判定
        if contradicts(ct, format) {
            return Err(CaptureError::mismatch(expected, ct));
        }
        if format.matches_content_type(ct) {
            return Ok(expected);
        }
    }

    Ok(expected)
}

fn name_extension(name: &str) -> Option<String> {
    Path::new(name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// content-type 明确指向另一种格式或一个网页
fn contradicts(content_type: &str, format: DocFormat) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("html") {
        return true;
    }
    match format {
        DocFormat::Pdf => DocFormat::Xml.matches_content_type(&ct),
        DocFormat::Xml => DocFormat::Pdf.matches_content_type(&ct),
    }
}

/// 从行文字中提取标识：访问密钥 (44-50 位) > 格式化的 CNPJ/CPF
pub fn extract_tax_id(text: &str) -> Option<String> {
    if let Some(m) = ACCESS_KEY_RE.find(text) {
        return Some(m.as_str().to_string());
    }
    DOCUMENT_RE
        .find(text)
        .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect())
}

/// 行标识，提取不到时退化为位置标记 `linha{n}`
pub fn row_token(text: &str, position: usize) -> String {
    extract_tax_id(text).unwrap_or_else(|| format!("linha{}", position))
}

/// `{category}-{token}-{seq}{ext}`
pub fn file_name(category: Category, token: &str, sequence: usize, ext: &str) -> String {
    format!("{}-{}-{}{}", category.slug(), token, sequence, ext)
}

/// 先写 `.part` 再改名，失败时清理临时文件
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    if let Err(source) = fs::write(&partial, bytes).await {
        let _ = fs::remove_file(&partial).await;
        return Err(StorageError::WriteFailed {
            path: dest.to_path_buf(),
            source,
        });
    }
    if let Err(source) = fs::rename(&partial, dest).await {
        let _ = fs::remove_file(&partial).await;
        return Err(StorageError::WriteFailed {
            path: dest.to_path_buf(),
            source,
        });
    }

    debug!("已写入 {} ({} 字节)", dest.display(), bytes.len());
    Ok(())
}

/// 创建目录（含父目录）
pub async fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|source| StorageError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_name() {
        assert_eq!(resolve_extension(Some("nota.PDF"), None, DocFormat::Pdf).unwrap(), ".pdf");
        assert!(matches!(
            resolve_extension(Some("nota.xml"), Some("application/pdf"), DocFormat::Pdf),
            Err(CaptureError::ExtensionMismatch { .. })
        ));
    }

    #[test]
    fn test_mismatched_extensions_rejected() {
        for name in ["a.xml", "a.html", "a.zip", "a.txt"] {
            assert!(
                resolve_extension(Some(name), None, DocFormat::Pdf).is_err(),
                "{} should be rejected",
                name
            );
        }
        assert!(resolve_extension(Some("a.pdf"), None, DocFormat::Xml).is_err());
    }

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(resolve_extension(Some("download"), Some("text/xml"), DocFormat::Xml).unwrap(), ".xml");
        assert!(resolve_extension(None, Some("application/pdf"), DocFormat::Xml).is_err());
        assert!(resolve_extension(None, Some("text/html; charset=utf-8"), DocFormat::Pdf).is_err());
    }

    #[test]
    fn test_xhtml_page_is_not_xml() {
        let err = resolve_extension(None, Some("application/xhtml+xml; charset=utf-8"), DocFormat::Xml)
            .unwrap_err();
        assert!(matches!(err, CaptureError::ExtensionMismatch { .. }));
        assert!(resolve_extension(Some("login"), Some("application/xhtml+xml"), DocFormat::Xml).is_err());
        assert_eq!(
            resolve_extension(None, Some("application/xml"), DocFormat::Xml).unwrap(),
            ".xml"
        );
    }

    #[test]
    fn test_extension_defaults_to_requested() {
        assert_eq!(resolve_extension(None, None, DocFormat::Pdf).unwrap(), ".pdf");
        assert_eq!(
            resolve_extension(None, Some("application/octet-stream"), DocFormat::Xml).unwrap(),
            ".xml"
        );
    }

    #[test]
    fn test_extract_tax_id() {
        let key = "3".repeat(44);
        assert_eq!(extract_tax_id(&format!("Chave {} emitida", key)), Some(key));
        assert_eq!(
            extract_tax_id("Tomador 12.345.678/0001-90 R$ 10,00"),
            Some("12345678000190".to_string())
        );
        assert_eq!(extract_tax_id("CPF 123.456.789-09"), Some("12345678909".to_string()));
        assert_eq!(extract_tax_id("Nota 123 01/10/2025"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(row_token("sem documento", 7), "linha7");
        assert_eq!(
            file_name(Category::Emitidas, "12345678000190", 3, ".xml"),
            "emitidas-12345678000190-3.xml"
        );
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nota.xml");
        write_atomic(&dest, b"<nfse/>").await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"<nfse/>");
        assert!(!dir.path().join("nota.xml.part").exists());
    }

    #[tokio::test]
    async fn test_write_atomic_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing").join("nota.xml");
        assert!(matches!(
            write_atomic(&dest, b"x").await,
            Err(StorageError::WriteFailed { .. })
        ));
    }
}
