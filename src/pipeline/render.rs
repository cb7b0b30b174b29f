//! Notification message formatting (bot API HTML parse mode).

use rust_decimal::Decimal;

use crate::models::identity::shorten;
use crate::models::{ActivityRecord, ProjectMetadata, TokenMetadata, TokenMovement, TrackedIdentity};
use crate::pipeline::classify::{Label, is_short_address_like};
use crate::utils::{address_link, escape_attr, escape_html, profile_link, title_case, tx_link};

/// Metadata tables a message is rendered against.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub tokens: &'a TokenMetadata,
    pub projects: &'a ProjectMetadata,
}

/// Render the notification body for one record.
pub fn render_message(
    record: &ActivityRecord,
    identity: &TrackedIdentity,
    label: Label,
    ctx: MessageContext<'_>,
) -> String {
    let mut lines = Vec::with_capacity(6);

    lines.push(format!(
        "<a href='{}'>{}</a> on {} from <a href='{}'>{}</a>",
        escape_attr(&tx_link(&record.chain, &record.id)),
        escape_html(&record.short_id()),
        escape_html(&record.chain.to_uppercase()),
        escape_attr(&profile_link(&identity.address)),
        escape_html(&identity.display_name),
    ));

    let stamp = record
        .occurred_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    lines.push(format!("Stamp: {stamp}"));
    lines.push(format!("Type: {}", type_line(record, ctx)));

    if !record.sends.is_empty() {
        lines.push(format!("Send: {}", legs(record, &record.sends, '-', ctx.tokens)));
    }
    if !record.receives.is_empty() {
        lines.push(format!("Receive: {}", legs(record, &record.receives, '+', ctx.tokens)));
    }

    lines.push(format!("#{label}"));
    lines.join("\n")
}

/// Warning sent to the debug destination when the process stops.
pub fn render_exit_warning(program: &str, reason: &str) -> String {
    format!(
        "<b>⚠️WARNING</b>\n{} stopped: {}",
        escape_html(program),
        escape_html(reason)
    )
}

fn type_line(record: &ActivityRecord, ctx: MessageContext<'_>) -> String {
    let mut kind = title_case(&record.category);
    if kind.is_empty() {
        kind = "Contract Interaction".to_string();
    }

    if let Some(approval) = &record.approval {
        let symbol = ctx
            .tokens
            .get(&approval.token_id)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| shorten(&approval.token_id, 6, 4));
        kind = format!("{kind} {}", escape_html(&symbol));
    } else {
        kind = escape_html(&kind);
    }

    let mut line = if record.counterparty.is_empty() {
        kind
    } else {
        format!(
            "<a href='{}'>{}</a>",
            escape_attr(&address_link(&record.chain, &record.counterparty)),
            kind
        )
    };

    let project = record
        .project_id
        .as_ref()
        .and_then(|id| ctx.projects.get(id))
        .map(|p| p.name.trim())
        .filter(|name| !name.is_empty());
    if let Some(name) = project {
        line.push_str(&format!(" on {}", escape_html(name)));
    }
    line
}

fn legs(record: &ActivityRecord, movements: &[TokenMovement], sign: char, tokens: &TokenMetadata) -> String {
    movements
        .iter()
        .map(|m| leg(record, m, sign, tokens))
        .collect::<Vec<_>>()
        .join(", ")
}

fn leg(record: &ActivityRecord, movement: &TokenMovement, sign: char, tokens: &TokenMetadata) -> String {
    let Some(info) = tokens.get(&movement.token_id) else {
        let kind = if is_short_address_like(&movement.token_id) {
            "NFT"
        } else {
            "Item"
        };
        return format!("{sign}1 Unknown {kind}");
    };

    let symbol = if info.symbol.trim().is_empty() {
        shorten(&movement.token_id, 6, 4)
    } else {
        info.symbol.clone()
    };
    // Spam tokens routinely pair absurd prices with absurd amounts.
    let value = match info.price.and_then(|price| price.checked_mul(movement.amount)) {
        Some(value) => format!("${}", group_thousands(&format!("{value:.2}"))),
        None => "n/a".to_string(),
    };

    format!(
        "{sign}{} <a href='{}'>{}</a> ({value})",
        format_amount(movement.amount),
        escape_attr(&address_link(&record.chain, &movement.token_id)),
        escape_html(&symbol),
    )
}

/// Amount with at most four decimals and thousands separators.
pub fn format_amount(amount: Decimal) -> String {
    group_thousands(&amount.abs().round_dp(4).normalize().to_string())
}

/// Insert `,` every three digits of the integer part of a plain decimal string.
fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}
