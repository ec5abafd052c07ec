//! 支付数据服务
//!
//! ## 职责
//! - 解析 card.txt 中的信用卡记录
//! - 在多个并发任务之间按顺序轮转分发信用卡
//! - 为每次支付随机附加姓名和邮编

use std::collections::HashMap;
use std::sync::Mutex;

use rand::seq::SliceRandom;
use tracing::info;

use crate::error::{AppError, AppResult, DataError};
use crate::models::{PaymentCard, PaymentInfo};
use crate::services::input_service::InputSource;

const REASON_NOT_WRAPPED: &str = "格式错误，未使用 [] 包裹";
const REASON_MISSING_FIELD: &str = "缺少必须字段(pan/cvv/exp_month)";
const REASON_BAD_FORMAT: &str = "格式错误，期望 [pan:..., cvv:..., exp_month:MM/YY]";

/// 启动时一次性加载的三个数据池
#[derive(Debug, Clone, Default)]
pub struct PaymentPools {
    pub cards: Vec<PaymentCard>,
    pub names: Vec<String>,
    pub zip_codes: Vec<String>,
}

/// 解析信用卡文本，每行形如 `[pan:..., cvv:..., exp_month:MM/YY]`
///
/// 空行跳过；任意一行不合法即整体失败，并报告行号和原始内容
pub fn parse_cards(text: &str) -> Result<Vec<PaymentCard>, DataError> {
    let mut cards = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        cards.push(parse_card_line(line).map_err(|reason| DataError::CardParse {
            line: idx + 1,
            reason: reason.to_string(),
            content: line.to_string(),
        })?);
    }
    Ok(cards)
}

fn parse_card_line(line: &str) -> Result<PaymentCard, &'static str> {
    let content = line
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or(REASON_NOT_WRAPPED)?;

    let mut fields = HashMap::new();
    for part in content.split(',') {
        let (key, value) = part.split_once(':').ok_or(REASON_BAD_FORMAT)?;
        fields.insert(key.trim(), value.trim());
    }

    let (Some(pan), Some(cvv), Some(exp)) = (
        fields.get("pan"),
        fields.get("cvv"),
        fields.get("exp_month"),
    ) else {
        return Err(REASON_MISSING_FIELD);
    };

    let (month, year) = exp.split_once('/').ok_or(REASON_BAD_FORMAT)?;

    Ok(PaymentCard {
        pan: pan.to_string(),
        cvv: cvv.to_string(),
        exp_month: month.trim().to_string(),
        exp_year: year.trim().to_string(),
    })
}

/// 并发安全的支付信息分发器
///
/// 信用卡按加载顺序循环分发，第 k 次调用拿到第 `k mod n` 张卡
pub struct PaymentDataProvider {
    pools: PaymentPools,
    cursor: Mutex<usize>,
}

impl PaymentDataProvider {
    pub fn from_pools(pools: PaymentPools) -> Self {
        info!(
            "成功加载数据: 信用卡 {} 张, 姓名 {} 个, 邮编 {} 个",
            pools.cards.len(),
            pools.names.len(),
            pools.zip_codes.len()
        );
        Self {
            pools,
            cursor: Mutex::new(0),
        }
    }

    /// 从输入来源加载
    pub async fn load(source: &dyn InputSource) -> AppResult<Self> {
        let pools = source.read_payment_pools().await?;
        Ok(Self::from_pools(pools))
    }

    /// 取下一份支付信息
    ///
    /// 任意一个池为空时返回 `DataError::Incomplete`，且不推进游标
    pub fn next(&self) -> AppResult<PaymentInfo> {
        let PaymentPools {
            cards,
            names,
            zip_codes,
        } = &self.pools;
        if cards.is_empty() || names.is_empty() || zip_codes.is_empty() {
            return Err(DataError::Incomplete.into());
        }

        let card = {
            let mut cursor = self
                .cursor
                .lock()
                .map_err(|_| AppError::Other("支付数据游标锁已损坏".to_string()))?;
            let card = cards[*cursor % cards.len()].clone();
            *cursor += 1;
            card
        };

        let mut rng = rand::thread_rng();
        let name = names.choose(&mut rng).cloned().unwrap_or_default();
        let zip_code = zip_codes.choose(&mut rng).cloned().unwrap_or_default();

        Ok(PaymentInfo {
            card,
            name,
            zip_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn card(pan: &str) -> PaymentCard {
        PaymentCard {
            pan: pan.to_string(),
            cvv: "123".to_string(),
            exp_month: "10".to_string(),
            exp_year: "30".to_string(),
        }
    }

    fn provider(cards: Vec<PaymentCard>) -> PaymentDataProvider {
        PaymentDataProvider::from_pools(PaymentPools {
            cards,
            names: vec!["Alice".to_string(), "Bob".to_string()],
            zip_codes: vec!["10001".to_string()],
        })
    }

    #[test]
    fn test_parse_valid_cards() {
        let text = "[pan:4111111111111111, cvv:023, exp_month:10/30]\n\n[ pan : 5500000000000004 ,cvv:999,exp_month:1/2031 ]\n";
        let cards = parse_cards(text).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].cvv, "023");
        assert_eq!(cards[0].exp_month, "10");
        assert_eq!(cards[1].pan, "5500000000000004");
        assert_eq!(cards[1].exp_year, "2031");
    }

    #[test]
    fn test_parse_errors_report_line_and_reason() {
        let err = parse_cards("[pan:1, cvv:2, exp_month:10/30]\npan:1, cvv:2").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("第 2 行"));
        assert!(message.contains("未使用 [] 包裹"));

        let err = parse_cards("[pan:1, cvv:2]").unwrap_err();
        assert!(err.to_string().contains("缺少必须字段"));

        let err = parse_cards("[pan:1, cvv:2, exp_month:1030]").unwrap_err();
        assert!(err.to_string().contains("期望 [pan:..., cvv:..., exp_month:MM/YY]"));

        let err = parse_cards("[pan 1, cvv:2, exp_month:10/30]").unwrap_err();
        assert!(err.to_string().contains("格式错误"));
    }

    #[test]
    fn test_cards_cycle_in_order() {
        let provider = provider(vec![card("c1"), card("c2")]);
        let pans: Vec<String> = (0..5).map(|_| provider.next().unwrap().card.pan).collect();
        assert_eq!(pans, vec!["c1", "c2", "c1", "c2", "c1"]);
    }

    #[test]
    fn test_incomplete_pools_fail() {
        let provider = PaymentDataProvider::from_pools(PaymentPools {
            cards: vec![card("c1")],
            names: vec![],
            zip_codes: vec!["10001".to_string()],
        });
        let err = provider.next().unwrap_err();
        assert!(matches!(err, AppError::Data(DataError::Incomplete)));
    }

    #[test]
    fn test_concurrent_callers_get_distinct_indices() {
        let cards: Vec<PaymentCard> = (0..8).map(|i| card(&format!("c{}", i))).collect();
        let provider = Arc::new(provider(cards));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                std::thread::spawn(move || provider.next().unwrap().card.pan)
            })
            .collect();

        let pans: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(pans.len(), 8);
    }
}
