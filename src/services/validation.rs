//! 输入数据格式校验
//!
//! 启动批次前检查输入目录下的四个文件，返回所有发现的问题（带文件名和行号）。
//! 只做格式检查，不会修改文件。

use regex::Regex;

use crate::error::AppResult;
use crate::services::account_service::ACCOUNT_SEPARATOR;
use crate::services::input_service::{DirInputSource, ACCOUNT_FILE, CARD_FILE, NAME_FILE, ZIP_FILE};

/// 校验输入目录，返回问题列表；列表为空表示校验通过
pub async fn validate_inputs(source: &DirInputSource) -> AppResult<Vec<String>> {
    let mut issues = Vec::new();

    let accounts = source.read_optional(ACCOUNT_FILE).await?;
    match accounts {
        Some(text) => issues.extend(validate_account_text(&text)),
        None => issues.push(format!("{} 不存在", ACCOUNT_FILE)),
    }
    if let Some(text) = source.read_optional(CARD_FILE).await? {
        issues.extend(validate_card_text(&text));
    }
    if let Some(text) = source.read_optional(NAME_FILE).await? {
        issues.extend(validate_name_text(&text));
    }
    if let Some(text) = source.read_optional(ZIP_FILE).await? {
        issues.extend(validate_zip_text(&text));
    }

    Ok(issues)
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, raw)| (i + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty())
}

pub fn validate_account_text(text: &str) -> Vec<String> {
    let mut issues = Vec::new();
    for (line_no, line) in non_empty_lines(text) {
        let parts: Vec<&str> = line.split(ACCOUNT_SEPARATOR).map(str::trim).collect();
        let [email, password, recovery_email, _secret] = parts.as_slice() else {
            issues.push(format!(
                "{} 第{}行: 应为 4 段 (email----password----recovery_email----2fa)",
                ACCOUNT_FILE, line_no
            ));
            continue;
        };
        if email.is_empty() || !email.contains('@') {
            issues.push(format!("{} 第{}行: 邮箱格式看起来不正确", ACCOUNT_FILE, line_no));
        }
        if password.is_empty() {
            issues.push(format!("{} 第{}行: 密码为空", ACCOUNT_FILE, line_no));
        }
        if !recovery_email.is_empty() && !recovery_email.contains('@') {
            issues.push(format!("{} 第{}行: 恢复邮箱格式看起来不正确", ACCOUNT_FILE, line_no));
        }
    }
    issues
}

/// 解析一行卡片记录为 (pan, cvv, month, year)，不合法时返回 `None`
fn split_card_line(line: &str) -> Option<(String, String, String, String)> {
    let content = line.strip_prefix('[')?.strip_suffix(']')?;
    let mut pan = None;
    let mut cvv = None;
    let mut exp = None;
    for part in content.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once(':')?;
        match key.trim() {
            "pan" => pan = Some(value.trim()),
            "cvv" => cvv = Some(value.trim()),
            "exp_month" => exp = Some(value.trim()),
            _ => {}
        }
    }
    let (month, year) = exp?.split_once('/')?;
    Some((
        pan?.to_string(),
        cvv?.to_string(),
        month.trim().to_string(),
        year.trim().to_string(),
    ))
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

pub fn validate_card_text(text: &str) -> Vec<String> {
    let mut issues = Vec::new();
    for (line_no, line) in non_empty_lines(text) {
        let Some((pan, cvv, month, year)) = split_card_line(line) else {
            issues.push(format!(
                "{} 第{}行: 格式错误，期望 [pan:..., cvv:..., exp_month:MM/YY]",
                CARD_FILE, line_no
            ));
            continue;
        };

        if pan.is_empty() {
            issues.push(format!("{} 第{}行: pan 不能为空", CARD_FILE, line_no));
        } else if !all_digits(&pan) || !(12..=19).contains(&pan.len()) {
            issues.push(format!("{} 第{}行: pan 应为 12-19 位数字", CARD_FILE, line_no));
        }

        if cvv.is_empty() {
            issues.push(format!("{} 第{}行: cvv 不能为空", CARD_FILE, line_no));
        } else if !all_digits(&cvv) || !(3..=4).contains(&cvv.len()) {
            issues.push(format!("{} 第{}行: cvv 应为 3 或 4 位数字", CARD_FILE, line_no));
        }

        let month_ok = all_digits(&month)
            && month.len() <= 2
            && month.parse::<u8>().map_or(false, |m| (1..=12).contains(&m));
        if month.is_empty() {
            issues.push(format!("{} 第{}行: 月份不能为空", CARD_FILE, line_no));
        } else if !month_ok {
            issues.push(format!("{} 第{}行: 月份应为 1-12", CARD_FILE, line_no));
        }

        if year.is_empty() {
            issues.push(format!("{} 第{}行: 年份不能为空", CARD_FILE, line_no));
        } else if !all_digits(&year) || !(year.len() == 2 || year.len() == 4) {
            issues.push(format!("{} 第{}行: 年份应为 2 或 4 位数字", CARD_FILE, line_no));
        }
    }
    issues
}

pub fn validate_name_text(text: &str) -> Vec<String> {
    non_empty_lines(text)
        .filter(|(_, line)| line.chars().count() < 2)
        .map(|(line_no, _)| format!("{} 第{}行: 姓名过短", NAME_FILE, line_no))
        .collect()
}

pub fn validate_zip_text(text: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(r"^[A-Za-z0-9\- ]{3,12}$") else {
        return Vec::new();
    };
    non_empty_lines(text)
        .filter(|(_, line)| !pattern.is_match(line))
        .map(|(line_no, _)| format!("{} 第{}行: 邮编格式看起来不正确", ZIP_FILE, line_no))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_account_issues() {
        let issues = validate_account_text(
            "a@x.com----pw----r@x.com----S\n\nbad\nnoat----pw----r@x.com----S\nb@x.com--------norecovery----S\n",
        );
        assert_eq!(issues.len(), 4);
        assert!(issues[0].contains("第3行") && issues[0].contains("应为 4 段"));
        assert!(issues[1].contains("第4行") && issues[1].contains("邮箱"));
        assert!(issues[2].contains("第5行") && issues[2].contains("密码为空"));
        assert!(issues[3].contains("第5行") && issues[3].contains("恢复邮箱"));
    }

    #[test]
    fn test_card_issues() {
        let text = "\
[pan:4111111111111111, cvv:123, exp_month:10/30]
[pan:4111, cvv:12, exp_month:13/3]
[pan:4111111111111111, cvv:1234, exp_month:1/2031]
pan:1
";
        let issues = validate_card_text(text);
        assert_eq!(issues.len(), 5);
        assert!(issues.iter().all(|i| !i.contains("第1行") && !i.contains("第3行")));
        assert!(issues[0].contains("pan 应为 12-19 位数字"));
        assert!(issues[1].contains("cvv"));
        assert!(issues[2].contains("月份"));
        assert!(issues[3].contains("年份"));
        assert!(issues[4].contains("第4行"));
    }

    #[test]
    fn test_name_and_zip_issues() {
        assert_eq!(validate_name_text("Alice\n\nB\n").len(), 1);
        let zips = validate_zip_text("10001\n\n12\nAB-123\n$$$$\n");
        assert_eq!(zips.len(), 2);
    }

    #[tokio::test]
    async fn test_validate_inputs_reports_missing_accounts() {
        let dir = TempDir::new().unwrap();
        let source = DirInputSource::new(dir.path());
        let issues = validate_inputs(&source).await.unwrap();
        assert_eq!(issues, vec!["account.txt 不存在".to_string()]);

        std::fs::write(dir.path().join(ACCOUNT_FILE), "a@x.com----pw----r@x.com----S\n").unwrap();
        std::fs::write(dir.path().join(NAME_FILE), "Alice Smith\n").unwrap();
        let issues = validate_inputs(&source).await.unwrap();
        assert!(issues.is_empty());
    }
}
