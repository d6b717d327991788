// 上传文件校验
//
// 纯函数，不访问网络和文件系统：
// 1. 未选择文件
// 2. 无法识别媒体类型
// 3. 媒体类型不允许
// 4. 文件大小超限
// 5. 视频时长超限
//
// 按顺序检查，第一个失败的规则生效

use crate::uploader::error::ValidationError;
use crate::uploader::task::FileDescriptor;
use serde::{Deserialize, Serialize};

/// 可识别的图片扩展名
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "bmp"];

/// 可识别的视频扩展名
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp"];

/// 默认最大文件大小（100MB）
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// 默认最大视频时长（5 分钟）
pub const DEFAULT_MAX_DURATION_SECS: u64 = 300;

/// 媒体类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    Image,
    Video,
}

/// 上传约束
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConstraints {
    /// 最大文件大小（字节）
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    /// 最大视频时长（秒），None 表示不限制
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: Option<u64>,
    /// 允许的媒体类别
    #[serde(default = "default_allowed")]
    pub allowed: Vec<MediaClass>,
}

fn default_max_size_bytes() -> u64 {
    DEFAULT_MAX_SIZE_BYTES
}

fn default_max_duration_secs() -> Option<u64> {
    Some(DEFAULT_MAX_DURATION_SECS)
}

fn default_allowed() -> Vec<MediaClass> {
    vec![MediaClass::Image, MediaClass::Video]
}

impl Default for UploadConstraints {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            max_duration_secs: default_max_duration_secs(),
            allowed: default_allowed(),
        }
    }
}

impl UploadConstraints {
    /// 仅允许图片
    pub fn images_only(max_size_bytes: u64) -> Self {
        Self {
            max_size_bytes,
            max_duration_secs: None,
            allowed: vec![MediaClass::Image],
        }
    }

    /// 仅允许视频
    pub fn videos_only(max_size_bytes: u64, max_duration_secs: Option<u64>) -> Self {
        Self {
            max_size_bytes,
            max_duration_secs,
            allowed: vec![MediaClass::Video],
        }
    }
}

/// 识别媒体类别
///
/// 优先使用声明的 MIME 类型，其次使用文件名（或 uri）的扩展名
pub fn classify(file: &FileDescriptor) -> Option<MediaClass> {
    if let Some(mime) = file.mime_type.as_deref() {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            return Some(MediaClass::Image);
        }
        if mime.starts_with("video/") {
            return Some(MediaClass::Video);
        }
    }

    let name = if file.name.trim().is_empty() {
        file.uri.as_str()
    } else {
        file.name.as_str()
    };
    let ext = extension_of(name)?;

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaClass::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaClass::Video)
    } else {
        None
    }
}

/// 提取小写扩展名，忽略 query 和 fragment
fn extension_of(name: &str) -> Option<String> {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// 校验文件是否满足约束
///
/// 成功时返回识别出的媒体类别
pub fn validate(
    file: &FileDescriptor,
    constraints: &UploadConstraints,
) -> Result<MediaClass, ValidationError> {
    if file.uri.trim().is_empty() {
        return Err(ValidationError::NoFileSelected);
    }

    let class = classify(file).ok_or(ValidationError::UnsupportedType)?;

    if !constraints.allowed.contains(&class) {
        return Err(ValidationError::TypeNotAllowed);
    }

    if let Some(size) = file.size {
        if size > constraints.max_size_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: constraints.max_size_bytes,
            });
        }
    }

    if class == MediaClass::Video {
        if let (Some(duration), Some(limit)) = (file.duration_secs, constraints.max_duration_secs)
        {
            if duration > limit as f64 {
                return Err(ValidationError::TooLong {
                    duration_secs: duration,
                    limit_secs: limit,
                });
            }
        }
    }

    Ok(class)
}
