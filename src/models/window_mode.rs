use std::fmt;

use serde::Deserialize;

/// 浏览器窗口模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum WindowMode {
    Visible,
    Minimized,
    #[default]
    Headless,
}

impl WindowMode {
    /// 解析窗口模式，无法识别的值一律按无头模式处理
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "visible" => WindowMode::Visible,
            "minimized" => WindowMode::Minimized,
            _ => WindowMode::Headless,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowMode::Visible => "visible",
            WindowMode::Minimized => "minimized",
            WindowMode::Headless => "headless",
        }
    }
}

impl From<String> for WindowMode {
    fn from(value: String) -> Self {
        WindowMode::parse(&value)
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_unknown_to_headless() {
        assert_eq!(WindowMode::parse(" Visible "), WindowMode::Visible);
        assert_eq!(WindowMode::parse("MINIMIZED"), WindowMode::Minimized);
        assert_eq!(WindowMode::parse(""), WindowMode::Headless);
        assert_eq!(WindowMode::parse("fullscreen"), WindowMode::Headless);
    }
}
