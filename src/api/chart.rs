//! メッセージ数推移グラフの描画

use chrono::{DateTime, Utc};
use std::fmt::Write as _;

use crate::analytics::ThroughputBucket;

const WIDTH: f64 = 1000.0;
const HEIGHT: f64 = 700.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_TOP: f64 = 90.0;
const MARGIN_BOTTOM: f64 = 90.0;
const Y_TICKS: u64 = 5;

/// 描画するグラフの内容
#[derive(Debug, Clone)]
pub struct ChartSpec<'a> {
    pub title: String,
    pub subtitle: String,
    pub buckets: &'a [ThroughputBucket],
}

/// グラフ描画の抽象インタフェース
pub trait ChartRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn render(&self, chart: &ChartSpec<'_>) -> Vec<u8>;
}

/// 言語コードに合わせた日付表記
pub fn localized_date(lang: Option<&str>, at: DateTime<Utc>) -> String {
    let lang = lang.unwrap_or("en").to_lowercase();
    match lang.as_str() {
        "ko" | "korean" => at.format("%Y년 %m월 %d일").to_string(),
        "ja" | "japanese" => at.format("%Y年%m月%d日").to_string(),
        "fr" | "french" => at.format("%d/%m/%Y").to_string(),
        "de" | "german" => at.format("%d.%m.%Y").to_string(),
        "es" | "spanish" => at.format("%d/%m/%Y").to_string(),
        _ => at.format("%B %-d, %Y").to_string(),
    }
}

/// SVG で折れ線グラフを描く
#[derive(Debug, Default, Clone)]
pub struct SvgChartRenderer;

impl SvgChartRenderer {
    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
    }

    /// 目盛りの上限（5刻みで切り上げ、最低5）
    fn axis_max(max_count: u64) -> u64 {
        let step = Y_TICKS;
        max_count.max(1).div_ceil(step) * step
    }
}

impl ChartRenderer for SvgChartRenderer {
    fn content_type(&self) -> &'static str {
        "image/svg+xml"
    }

    fn render(&self, chart: &ChartSpec<'_>) -> Vec<u8> {
        let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
        let max_count = chart.buckets.iter().map(|b| b.count).max().unwrap_or(0);
        let y_max = Self::axis_max(max_count) as f64;
        let n = chart.buckets.len();

        let x_of = |i: usize| {
            if n <= 1 {
                MARGIN_LEFT + plot_w / 2.0
            } else {
                MARGIN_LEFT + plot_w * i as f64 / (n - 1) as f64
            }
        };
        let y_of = |count: u64| MARGIN_TOP + plot_h - plot_h * count as f64 / y_max;

        let mut svg = String::with_capacity(4096);
        // String への書き込みは失敗しない
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="SansSerif">"#
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<rect x="{MARGIN_LEFT}" y="{MARGIN_TOP}" width="{plot_w}" height="{plot_h}" fill="rgb(240,240,240)"/>"#
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="40" text-anchor="middle" font-size="14" font-weight="bold">{}</text>"#,
            WIDTH / 2.0,
            Self::escape(&chart.title)
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="62" text-anchor="middle" font-size="12" font-style="italic">{}</text>"#,
            WIDTH / 2.0,
            Self::escape(&chart.subtitle)
        );

        // 横グリッドと Y 軸ラベル
        for tick in 0..=Y_TICKS {
            let value = y_max * tick as f64 / Y_TICKS as f64;
            let y = MARGIN_TOP + plot_h - plot_h * tick as f64 / Y_TICKS as f64;
            let _ = writeln!(
                svg,
                r#"<line x1="{MARGIN_LEFT}" y1="{y:.1}" x2="{}" y2="{y:.1}" stroke="lightgray"/>"#,
                MARGIN_LEFT + plot_w
            );
            let _ = writeln!(
                svg,
                r#"<text x="{}" y="{:.1}" text-anchor="end" font-size="11">{}</text>"#,
                MARGIN_LEFT - 8.0,
                y + 4.0,
                value.round() as u64
            );
        }

        // X 軸ラベル（最大10個程度に間引く）
        let label_step = (n / 10).max(1);
        for (i, bucket) in chart.buckets.iter().enumerate().step_by(label_step) {
            let x = x_of(i);
            let _ = writeln!(
                svg,
                r#"<text x="{x:.1}" y="{:.1}" text-anchor="end" font-size="11" transform="rotate(-90 {x:.1} {:.1})">{}</text>"#,
                HEIGHT - MARGIN_BOTTOM + 12.0,
                HEIGHT - MARGIN_BOTTOM + 12.0,
                bucket.interval_start.format("%H:%M:%S")
            );
        }

        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="12">Time</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            HEIGHT - 10.0
        );
        let _ = writeln!(
            svg,
            r#"<text x="20" y="{:.1}" text-anchor="middle" font-size="12" transform="rotate(-90 20 {:.1})">Message Count</text>"#,
            MARGIN_TOP + plot_h / 2.0,
            MARGIN_TOP + plot_h / 2.0
        );

        if !chart.buckets.is_empty() {
            let points: Vec<String> = chart
                .buckets
                .iter()
                .enumerate()
                .map(|(i, b)| format!("{:.1},{:.1}", x_of(i), y_of(b.count)))
                .collect();
            let _ = writeln!(
                svg,
                r#"<polyline fill="none" stroke="red" stroke-width="2" points="{}"/>"#,
                points.join(" ")
            );
            for (i, bucket) in chart.buckets.iter().enumerate() {
                let _ = writeln!(
                    svg,
                    r#"<circle cx="{:.1}" cy="{:.1}" r="3" fill="red"><title>{}</title></circle>"#,
                    x_of(i),
                    y_of(bucket.count),
                    bucket.count
                );
            }
        }

        svg.push_str("</svg>\n");
        svg.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket(minute: u32, count: u64) -> ThroughputBucket {
        ThroughputBucket {
            interval_start: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            count,
        }
    }

    #[test]
    fn test_render_svg() {
        let buckets = vec![bucket(0, 3), bucket(1, 5), bucket(2, 2)];
        let svg = SvgChartRenderer.render(&ChartSpec {
            title: "Tom & Jerry <live>".to_string(),
            subtitle: "May 1, 2024".to_string(),
            buckets: &buckets,
        });
        let svg = String::from_utf8(svg).unwrap();

        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("Tom &amp; Jerry &lt;live&gt;"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert!(svg.contains("12:01:00"));
    }

    #[test]
    fn test_render_empty_history() {
        let svg = SvgChartRenderer.render(&ChartSpec {
            title: "empty".to_string(),
            subtitle: String::new(),
            buckets: &[],
        });
        let svg = String::from_utf8(svg).unwrap();
        assert!(!svg.contains("<polyline"));
    }

    #[test]
    fn test_axis_max_rounds_up() {
        assert_eq!(SvgChartRenderer::axis_max(0), 5);
        assert_eq!(SvgChartRenderer::axis_max(5), 5);
        assert_eq!(SvgChartRenderer::axis_max(6), 10);
    }

    #[test]
    fn test_localized_date() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(localized_date(Some("ko"), at), "2024년 05월 01일");
        assert_eq!(localized_date(Some("JA"), at), "2024年05月01日");
        assert_eq!(localized_date(None, at), "May 1, 2024");
    }
}
