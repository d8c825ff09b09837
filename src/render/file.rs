use crate::api::models::{Attachment, extension};
use crate::utils::format_file_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileIcon {
    Pdf,
    Word,
    Spreadsheet,
    Presentation,
    Archive,
    Generic,
}

impl FileIcon {
    /// MIME hint first, extension second.
    pub fn infer(mime_type: Option<&str>, file_name: &str) -> Self {
        let mime = mime_type.unwrap_or_default().to_ascii_lowercase();
        if mime.contains("pdf") {
            return Self::Pdf;
        }
        if mime.contains("word") || mime.contains("opendocument.text") {
            return Self::Word;
        }
        if mime.contains("sheet") || mime.contains("excel") || mime.contains("csv") {
            return Self::Spreadsheet;
        }
        if mime.contains("presentation") || mime.contains("powerpoint") {
            return Self::Presentation;
        }
        match extension(file_name).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("pdf") => Self::Pdf,
            Some("doc" | "docx" | "odt" | "rtf") => Self::Word,
            Some("xls" | "xlsx" | "ods" | "csv") => Self::Spreadsheet,
            Some("ppt" | "pptx" | "odp" | "key") => Self::Presentation,
            Some("zip" | "rar" | "7z" | "tar" | "gz") => Self::Archive,
            _ => Self::Generic,
        }
    }

    pub fn icon_name(self) -> &'static str {
        match self {
            Self::Pdf => "application-pdf-symbolic",
            Self::Word => "x-office-document-symbolic",
            Self::Spreadsheet => "x-office-spreadsheet-symbolic",
            Self::Presentation => "x-office-presentation-symbolic",
            Self::Archive => "package-x-generic-symbolic",
            Self::Generic => "text-x-generic-symbolic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileView {
    pub icon: FileIcon,
    pub file_name: String,
    pub url: String,
    /// Only when the backend reported a size.
    pub size_label: Option<String>,
    pub caption: Option<String>,
}

impl FileView {
    pub fn new(attachment: &Attachment, caption: Option<String>) -> Self {
        Self {
            icon: FileIcon::infer(attachment.mime_type.as_deref(), &attachment.file_name),
            file_name: attachment.file_name.clone(),
            url: attachment.url.clone(),
            size_label: attachment.size.map(format_file_size),
            caption,
        }
    }
}
