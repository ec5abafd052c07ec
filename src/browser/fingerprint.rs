//! 浏览器指纹
//!
//! 每个会话随机选择一组 UA / 分辨率 / 语言，降低多个并发会话之间的关联度

use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub os: &'static str,
    pub width: u32,
    pub height: u32,
    pub lang: &'static str,
    pub user_agent: &'static str,
}

pub const FINGERPRINTS: &[Fingerprint] = &[
    Fingerprint {
        os: "Win10",
        width: 1920,
        height: 1080,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    },
    Fingerprint {
        os: "Win11",
        width: 2560,
        height: 1440,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    },
    Fingerprint {
        os: "macOS",
        width: 1440,
        height: 900,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    },
    Fingerprint {
        os: "Win10",
        width: 1366,
        height: 768,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    },
    Fingerprint {
        os: "Win11",
        width: 1536,
        height: 864,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    },
    Fingerprint {
        os: "macOS",
        width: 2560,
        height: 1600,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    },
    Fingerprint {
        os: "Win10",
        width: 1600,
        height: 900,
        lang: "en-US",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    },
];

/// 随机选择一个指纹
pub fn pick() -> Fingerprint {
    *FINGERPRINTS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&FINGERPRINTS[0])
}
