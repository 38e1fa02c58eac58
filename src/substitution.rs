//! Placeholder substitution for message text.
//!
//! Tokens are exact literals (no templating language), replaced globally.
//! Unrecognized tokens pass through verbatim. The flow editor historically
//! emitted Portuguese token names, so both spellings are recognized.

use crate::model::Customer;

/// Replace customer placeholders in `text`.
///
/// - `{{name}}` / `{{nome_do_cliente}}` → display name, falling back to email
/// - `{{email}}` / `{{email_do_cliente}}` → email
///
/// Applying the function twice to its own output is a no-op as long as the
/// substituted values don't themselves contain token syntax.
pub fn substitute(text: &str, customer: &Customer) -> String {
    let name = customer.display_name();
    text.replace("{{nome_do_cliente}}", name)
        .replace("{{name}}", name)
        .replace("{{email_do_cliente}}", &customer.email)
        .replace("{{email}}", &customer.email)
}
