//! 支付信息实体

use std::fmt;

/// 信用卡记录，加载后不可变
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentCard {
    pub pan: String,
    pub cvv: String,
    pub exp_month: String,
    pub exp_year: String,
}

/// 一次支付所需的完整信息：信用卡 + 随机姓名 + 随机邮编
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentInfo {
    pub card: PaymentCard,
    pub name: String,
    pub zip_code: String,
}

impl PaymentCard {
    /// 卡号后四位（日志用）
    pub fn last4(&self) -> &str {
        let start = self.pan.len().saturating_sub(4);
        self.pan.get(start..).unwrap_or("")
    }
}

impl fmt::Debug for PaymentCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentCard(****{} {}/{})", self.last4(), self.exp_month, self.exp_year)
    }
}

impl fmt::Debug for PaymentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentInfo")
            .field("card", &self.card)
            .field("name", &self.name)
            .field("zip_code", &self.zip_code)
            .finish()
    }
}
