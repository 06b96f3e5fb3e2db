//! Text rendering for container diagnostics.
//!
//! Everything the container prints about a failed resolution goes
//! through here: recursive dependency chains, lifetime paths found by
//! validation, shortened type names and suggestions for unregistered
//! services.

/// Renders a dependency chain as a single line.
///
/// # Examples
/// ```
/// use qalib_support::rendering::render_chain;
///
/// let chain = vec!["OrderService", "PaymentGateway", "OrderService"];
/// assert_eq!(render_chain(&chain), "OrderService → PaymentGateway → OrderService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// One line of a vertically rendered dependency path.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    /// Service type (already shortened or not, rendered as given).
    pub type_name: String,
    /// Lifetime label, e.g. `PerContainer`.
    pub lifetime: String,
    /// Service name, if the registration is named.
    pub service_name: Option<String>,
}

/// Renders a dependency path with lifetime annotations.
///
/// ```text
/// [PerContainer] ReportCache
///                ↓
/// [PerScope    ] UnitOfWork  (name: "audit")
/// ```
pub fn render_chain_vertical(entries: &[ChainEntry]) -> String {
    let width = entries.iter().map(|e| e.lifetime.len()).max().unwrap_or(0);
    let mut out = String::new();

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(&" ".repeat(width + 3));
            out.push_str("↓\n");
        }

        out.push_str(&format!(
            "[{:<width$}] {}",
            entry.lifetime,
            entry.type_name,
            width = width,
        ));

        if let Some(ref name) = entry.service_name {
            out.push_str(&format!("  (name: {name:?})"));
        }

        out.push('\n');
    }

    out
}

/// Shortens a fully qualified type name for display.
///
/// Every path segment keeps only its last component, generic
/// arguments included.
///
/// ```
/// use qalib_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("shop::billing::Invoice"), "Invoice");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn shop::billing::Ledger>"),
///     "Arc<dyn Ledger>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut out = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                out.push_str(&segment);
                out.push(ch);
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    out.push_str(&segment);
    out
}

/// Ranks `available` names by similarity to `requested`.
///
/// Substring matches on the full name score highest, then substring
/// matches on the shortened name, then a shared prefix of at least
/// three characters. At most `max_suggestions` names are returned,
/// best first.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let requested_full = requested.to_lowercase();
    let requested_short = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter_map(|&candidate| {
            let full = candidate.to_lowercase();
            let short = shorten_type_name(candidate).to_lowercase();

            if full == requested_full {
                return None;
            }
            if full.contains(&requested_full) || requested_full.contains(&full) {
                return Some((candidate, 100));
            }
            if short.contains(&requested_short) || requested_short.contains(&short) {
                return Some((candidate, 80));
            }

            let prefix = short
                .chars()
                .zip(requested_short.chars())
                .take_while(|(a, b)| a == b)
                .count();

            (prefix >= 3).then_some((candidate, prefix * 10))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.dedup_by(|a, b| a.0 == b.0);
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}
