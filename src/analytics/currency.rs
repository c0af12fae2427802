//! 投げ銭金額文字列の通貨判定
//!
//! "USD 5", "$5.00", "CA$10", "₩1,000", "500円" のような自由形式の金額文字列から
//! 通貨を特定する。表示用途のみで、金額の真正性は検証しない。

use serde::Serialize;
use std::sync::OnceLock;

/// 通貨を特定できなかった場合のラベル
pub const UNKNOWN_CURRENCY_LABEL: &str = "Unknown currency";

/// 通貨テーブルのエントリ
#[derive(Debug, PartialEq, Eq)]
pub struct Currency {
    /// ISO 4217 コード
    pub code: &'static str,
    /// 表示名
    pub name: &'static str,
    /// 既知の記号（複数文字の記号を含む）
    pub symbols: &'static [&'static str],
}

static CURRENCIES: &[Currency] = &[
    Currency { code: "USD", name: "US Dollar", symbols: &["US$", "$"] },
    Currency { code: "CAD", name: "Canadian Dollar", symbols: &["CA$"] },
    Currency { code: "AUD", name: "Australian Dollar", symbols: &["A$"] },
    Currency { code: "NZD", name: "New Zealand Dollar", symbols: &["NZ$"] },
    Currency { code: "HKD", name: "Hong Kong Dollar", symbols: &["HK$"] },
    Currency { code: "TWD", name: "New Taiwan Dollar", symbols: &["NT$"] },
    Currency { code: "SGD", name: "Singapore Dollar", symbols: &["S$"] },
    Currency { code: "MXN", name: "Mexican Peso", symbols: &["MX$"] },
    Currency { code: "BRL", name: "Brazilian Real", symbols: &["R$"] },
    Currency { code: "EUR", name: "Euro", symbols: &["€"] },
    Currency { code: "GBP", name: "British Pound", symbols: &["£"] },
    Currency { code: "JPY", name: "Japanese Yen", symbols: &["¥", "￥", "円"] },
    Currency { code: "CNY", name: "Chinese Yuan", symbols: &["CN¥", "元"] },
    Currency { code: "KRW", name: "South Korean Won", symbols: &["₩", "￦", "원"] },
    Currency { code: "INR", name: "Indian Rupee", symbols: &["₹"] },
    Currency { code: "PHP", name: "Philippine Peso", symbols: &["₱"] },
    Currency { code: "VND", name: "Vietnamese Dong", symbols: &["₫"] },
    Currency { code: "THB", name: "Thai Baht", symbols: &["฿"] },
    Currency { code: "TRY", name: "Turkish Lira", symbols: &["₺"] },
    Currency { code: "RUB", name: "Russian Ruble", symbols: &["₽"] },
    Currency { code: "UAH", name: "Ukrainian Hryvnia", symbols: &["₴"] },
    Currency { code: "PLN", name: "Polish Zloty", symbols: &["zł"] },
    Currency { code: "CZK", name: "Czech Koruna", symbols: &["Kč"] },
    Currency { code: "HUF", name: "Hungarian Forint", symbols: &["Ft"] },
    Currency { code: "ILS", name: "Israeli New Shekel", symbols: &["₪"] },
    Currency { code: "IDR", name: "Indonesian Rupiah", symbols: &["Rp"] },
    Currency { code: "MYR", name: "Malaysian Ringgit", symbols: &["RM"] },
    Currency { code: "NGN", name: "Nigerian Naira", symbols: &["₦"] },
    Currency { code: "CRC", name: "Costa Rican Colon", symbols: &["₡"] },
    Currency { code: "PYG", name: "Paraguayan Guarani", symbols: &["₲"] },
    Currency { code: "PEN", name: "Peruvian Sol", symbols: &["S/"] },
    Currency { code: "CHF", name: "Swiss Franc", symbols: &[] },
    Currency { code: "SEK", name: "Swedish Krona", symbols: &[] },
    Currency { code: "NOK", name: "Norwegian Krone", symbols: &[] },
    Currency { code: "DKK", name: "Danish Krone", symbols: &[] },
    Currency { code: "ISK", name: "Icelandic Krona", symbols: &[] },
    Currency { code: "RON", name: "Romanian Leu", symbols: &[] },
    Currency { code: "BGN", name: "Bulgarian Lev", symbols: &[] },
    Currency { code: "RSD", name: "Serbian Dinar", symbols: &[] },
    Currency { code: "ZAR", name: "South African Rand", symbols: &[] },
    Currency { code: "ARS", name: "Argentine Peso", symbols: &[] },
    Currency { code: "CLP", name: "Chilean Peso", symbols: &[] },
    Currency { code: "COP", name: "Colombian Peso", symbols: &[] },
    Currency { code: "UYU", name: "Uruguayan Peso", symbols: &[] },
    Currency { code: "BOB", name: "Bolivian Boliviano", symbols: &[] },
    Currency { code: "DOP", name: "Dominican Peso", symbols: &[] },
    Currency { code: "GTQ", name: "Guatemalan Quetzal", symbols: &[] },
    Currency { code: "HNL", name: "Honduran Lempira", symbols: &[] },
    Currency { code: "NIO", name: "Nicaraguan Cordoba", symbols: &[] },
    Currency { code: "SAR", name: "Saudi Riyal", symbols: &[] },
    Currency { code: "AED", name: "UAE Dirham", symbols: &[] },
    Currency { code: "QAR", name: "Qatari Riyal", symbols: &[] },
    Currency { code: "KWD", name: "Kuwaiti Dinar", symbols: &[] },
    Currency { code: "EGP", name: "Egyptian Pound", symbols: &[] },
    Currency { code: "PKR", name: "Pakistani Rupee", symbols: &[] },
    Currency { code: "BYN", name: "Belarusian Ruble", symbols: &[] },
    Currency { code: "MKD", name: "Macedonian Denar", symbols: &[] },
    Currency { code: "BAM", name: "Bosnia-Herzegovina Mark", symbols: &[] },
];

/// 記号テーブル（長い記号から順に並べたもの）
fn symbol_table() -> &'static [(&'static str, &'static Currency)] {
    static TABLE: OnceLock<Vec<(&'static str, &'static Currency)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: Vec<_> = CURRENCIES
            .iter()
            .flat_map(|c| c.symbols.iter().map(move |s| (*s, c)))
            .collect();
        // "US$" が "$" より先に照合されるように文字数の降順で並べる
        table.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
        table
    })
}

/// コードから通貨を検索
pub fn find_by_code(code: &str) -> Option<&'static Currency> {
    CURRENCIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

/// 通貨の照合結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyMatch {
    /// 先頭の3文字コードに一致
    Code(&'static Currency),
    /// 既知の記号に一致
    Symbol {
        currency: &'static Currency,
        symbol: &'static str,
    },
    Unknown,
}

impl CurrencyMatch {
    pub fn currency(&self) -> Option<&'static Currency> {
        match self {
            CurrencyMatch::Code(c) => Some(c),
            CurrencyMatch::Symbol { currency, .. } => Some(currency),
            CurrencyMatch::Unknown => None,
        }
    }

    /// 表示用ラベル（例: "US Dollar (USD)"）
    pub fn label(&self) -> String {
        match self.currency() {
            Some(c) => format!("{} ({})", c.name, c.code),
            None => UNKNOWN_CURRENCY_LABEL.to_string(),
        }
    }
}

/// パース結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedAmount {
    /// 通貨ラベル
    pub label: String,
    /// 通貨コード（判定できた場合）
    pub code: Option<&'static str>,
    /// 数値部分（表示用）
    pub value: Option<f64>,
}

/// 金額文字列をパース
///
/// 先頭の3文字通貨コード、既知の記号（先頭→末尾の順）の順で照合する。
pub fn parse_amount(raw: &str) -> ParsedAmount {
    let trimmed = raw.trim();
    let (currency, rest) = match_currency(trimmed);

    ParsedAmount {
        label: currency.label(),
        code: currency.currency().map(|c| c.code),
        value: parse_numeric(rest),
    }
}

/// 通貨部分を照合し、残りの文字列を返す
pub fn match_currency(trimmed: &str) -> (CurrencyMatch, &str) {
    if let Some(prefix) = trimmed.get(..3) {
        let boundary_ok = trimmed[3..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphabetic());
        if boundary_ok && prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            if let Some(currency) = find_by_code(prefix) {
                return (CurrencyMatch::Code(currency), &trimmed[3..]);
            }
        }
    }

    let table = symbol_table();
    if let Some((symbol, currency)) = table.iter().find(|(s, _)| trimmed.starts_with(s)) {
        return (
            CurrencyMatch::Symbol { currency, symbol },
            &trimmed[symbol.len()..],
        );
    }
    if let Some((symbol, currency)) = table.iter().find(|(s, _)| trimmed.ends_with(s)) {
        return (
            CurrencyMatch::Symbol { currency, symbol },
            &trimmed[..trimmed.len() - symbol.len()],
        );
    }

    (CurrencyMatch::Unknown, trimmed)
}

/// 数値部分をパース（"1,234.50" → 1234.5, "3,50" → 3.5）
fn parse_numeric(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    // 小数区切りがカンマのみで末尾2桁以下ならカンマを小数点とみなす
    let normalized = match (cleaned.rfind(','), cleaned.contains('.')) {
        (Some(pos), false) if cleaned.len() - pos - 1 <= 2 => cleaned.replacen(',', ".", 1),
        _ => cleaned.replace(',', ""),
    };
    normalized.parse::<f64>().ok()
}
