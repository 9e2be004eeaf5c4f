//! Email payload rendering.
//!
//! Subject + HTML + plain-text bodies for the three notification kinds. The
//! wording is cosmetic; the contract the dispatch logic depends on is only
//! that every send carries both body forms and an unsubscribe link.

use crate::digest::DigestSummary;
use crate::models::{AlertSubscription, DigestFrequency, DigestSubscription, Fine, WatchlistEntry};

/// A fully rendered outbound message.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// "£6,000,000" style formatting; amounts are whole pounds in practice.
pub fn format_gbp(amount: f64) -> String {
    let whole = amount.round() as i64;
    let digits = whole.abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if whole < 0 {
        format!("-£{grouped}")
    } else {
        format!("£{grouped}")
    }
}

fn unsubscribe_footer_html(base_url: &str, token: &str) -> String {
    format!(
        r#"<p style="color:#888;font-size:12px">You receive these emails because you subscribed to FineWatch. <a href="{base_url}/unsubscribe?token={token}">Unsubscribe</a></p>"#
    )
}

fn unsubscribe_footer_text(base_url: &str, token: &str) -> String {
    format!("Unsubscribe: {base_url}/unsubscribe?token={token}")
}

fn fine_line_text(fine: &Fine) -> String {
    let categories = if fine.breach_categories.is_empty() {
        "uncategorised".to_string()
    } else {
        fine.breach_categories.join(", ")
    };
    let mut line = format!(
        "- {} — {} ({}) issued {}",
        fine.firm_name,
        format_gbp(fine.amount),
        categories,
        fine.date_issued
    );
    if let Some(url) = &fine.final_notice_url {
        line.push_str(&format!("\n  Final notice: {url}"));
    }
    line
}

fn fine_row_html(fine: &Fine) -> String {
    let categories = if fine.breach_categories.is_empty() {
        "uncategorised".to_string()
    } else {
        fine.breach_categories.join(", ")
    };
    let firm = match &fine.final_notice_url {
        Some(url) => format!(r#"<a href="{url}">{}</a>"#, fine.firm_name),
        None => fine.firm_name.clone(),
    };
    format!(
        "<tr><td>{firm}</td><td>{}</td><td>{categories}</td><td>{}</td></tr>",
        format_gbp(fine.amount),
        fine.date_issued
    )
}

fn fines_table_html(fines: &[Fine]) -> String {
    let rows: String = fines.iter().map(fine_row_html).collect();
    format!(
        "<table cellpadding=\"6\" cellspacing=\"0\" border=\"1\">\
         <tr><th>Firm</th><th>Amount</th><th>Breach categories</th><th>Issued</th></tr>{rows}</table>"
    )
}

/// Immediate alert: the new fines matching this subscriber's criteria.
pub fn alert_email(sub: &AlertSubscription, fines: &[Fine], base_url: &str) -> RenderedEmail {
    let subject = if fines.len() == 1 {
        format!(
            "FCA fine alert: {} fined {}",
            fines[0].firm_name,
            format_gbp(fines[0].amount)
        )
    } else {
        format!("FCA fine alert: {} new fines match your criteria", fines.len())
    };

    let text_body = format!(
        "New FCA fines matching your alert criteria:\n\n{}\n\n{}",
        fines.iter().map(fine_line_text).collect::<Vec<_>>().join("\n"),
        unsubscribe_footer_text(base_url, &sub.unsubscribe_token),
    );

    let html_body = format!(
        "<h2>New FCA fines matching your alert criteria</h2>{}{}",
        fines_table_html(fines),
        unsubscribe_footer_html(base_url, &sub.unsubscribe_token),
    );

    RenderedEmail {
        subject,
        html_body,
        text_body,
    }
}

/// Watchlist hit: new fines against a firm this subscriber watches.
pub fn watchlist_email(entry: &WatchlistEntry, fines: &[Fine], base_url: &str) -> RenderedEmail {
    let subject = format!("Watchlist alert: new FCA fine for {}", entry.firm_name);

    let text_body = format!(
        "A firm on your watchlist ({}) has been fined:\n\n{}\n\n{}",
        entry.firm_name,
        fines.iter().map(fine_line_text).collect::<Vec<_>>().join("\n"),
        unsubscribe_footer_text(base_url, &entry.unsubscribe_token),
    );

    let html_body = format!(
        "<h2>New FCA fine for {}</h2>{}{}",
        entry.firm_name,
        fines_table_html(fines),
        unsubscribe_footer_html(base_url, &entry.unsubscribe_token),
    );

    RenderedEmail {
        subject,
        html_body,
        text_body,
    }
}

/// Periodic digest: ranked summary of the whole period, sent even when empty.
pub fn digest_email(
    sub: &DigestSubscription,
    summary: &DigestSummary,
    base_url: &str,
) -> RenderedEmail {
    let period_label = match sub.frequency {
        DigestFrequency::Weekly => "Weekly",
        DigestFrequency::Monthly => "Monthly",
    };
    let subject = format!(
        "{period_label} FCA fines digest: {} fines totalling {}",
        summary.fines.len(),
        format_gbp(summary.total_amount)
    );

    let top = summary.top(5);

    let text_body = if summary.fines.is_empty() {
        format!(
            "{period_label} digest for {} to {}.\n\nNo FCA fines were issued in this period.\n\n{}",
            summary.period_start,
            summary.period_end,
            unsubscribe_footer_text(base_url, &sub.unsubscribe_token),
        )
    } else {
        format!(
            "{period_label} digest for {} to {}.\n\n{} fines, total {}, average {}.\n\nLargest fines:\n{}\n\n{}",
            summary.period_start,
            summary.period_end,
            summary.fines.len(),
            format_gbp(summary.total_amount),
            format_gbp(summary.average_amount),
            top.iter().map(fine_line_text).collect::<Vec<_>>().join("\n"),
            unsubscribe_footer_text(base_url, &sub.unsubscribe_token),
        )
    };

    let html_body = if summary.fines.is_empty() {
        format!(
            "<h2>{period_label} FCA fines digest</h2>\
             <p>{} to {}</p><p>No fines were issued in this period.</p>{}",
            summary.period_start,
            summary.period_end,
            unsubscribe_footer_html(base_url, &sub.unsubscribe_token),
        )
    } else {
        format!(
            "<h2>{period_label} FCA fines digest</h2>\
             <p>{} to {}: {} fines, total {}, average {}.</p>\
             <h3>Largest fines</h3>{}{}",
            summary.period_start,
            summary.period_end,
            summary.fines.len(),
            format_gbp(summary.total_amount),
            format_gbp(summary.average_amount),
            fines_table_html(top),
            unsubscribe_footer_html(base_url, &sub.unsubscribe_token),
        )
    };

    RenderedEmail {
        subject,
        html_body,
        text_body,
    }
}
