//! Payment plans and discounts for a single unit.
//!
//! Everything here is pure: the caller loads the unit row and this module
//! turns it into markdown plus the structured `<<PAYMENT_PLAN_DATA>>` card.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::LazyLock;

use crate::database::{is_truthy, number_of, text_of, Row};

pub const PAYMENT_PLAN_MARKER: &str = "<<PAYMENT_PLAN_DATA>>";
pub const PROPERTY_LINK_BASE: &str = "https://eshtriaqar.com/en/details";

static PLAN_YEARS_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\(([0-9]+)\)").expect("plan years regex is valid"));
static PROMO_PERCENT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*%").expect("promo percent regex is valid")
});
static WHOLE_PERCENT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"([0-9]+)\s*%").expect("whole percent regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    PaymentPlan,
    Promotional,
}

impl DiscountKind {
    pub fn title(&self) -> &'static str {
        match self {
            DiscountKind::PaymentPlan => "Payment_Plan",
            DiscountKind::Promotional => "Promotional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discount {
    pub kind: DiscountKind,
    pub percentage: f64,
    pub discounted_price: f64,
    pub amount: f64,
    pub description: String,
}

impl Discount {
    fn new(kind: DiscountKind, base_price: f64, percentage: f64, description: String) -> Self {
        let discounted_price = base_price * (1.0 - percentage / 100.0);
        Self {
            kind,
            percentage,
            discounted_price,
            amount: base_price - discounted_price,
            description,
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Rounds to a whole number and groups thousands with commas.
pub fn group_thousands(value: f64) -> String {
    let rounded = value.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if negative {
        format!("-{}", out)
    } else {
        out
    }
}

/// `"1,250,000 EGP"`, or `"Not specified"` for missing and non-positive values.
pub fn format_currency(value: Option<f64>) -> String {
    match value {
        Some(v) if v > 0.0 => format!("{} EGP", group_thousands(v)),
        _ => "Not specified".to_string(),
    }
}

/// Whole percentages print without a fraction.
fn format_percent(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

// ============================================================================
// Discounts
// ============================================================================

/// Unique positive year counts from a `"(3),(7)"` style plan, in order.
pub fn plan_years(payment_plan: &str) -> Vec<u32> {
    let mut years = Vec::new();
    for cap in PLAN_YEARS_RE.captures_iter(payment_plan) {
        if let Ok(y) = cap[1].parse::<u32>() {
            if y > 0 && !years.contains(&y) {
                years.push(y);
            }
        }
    }
    years
}

/// Discount implied by a short plan with a small down payment.
pub fn payment_plan_discount(base_price: f64, payment_plan: Option<&str>, down_payment: f64) -> Option<Discount> {
    let min_years = plan_years(payment_plan?).into_iter().min()?;
    let dp_pct = if base_price > 0.0 { down_payment / base_price * 100.0 } else { 0.0 };

    let percentage = if min_years <= 3 && dp_pct <= 10.0 {
        21.0
    } else if min_years <= 5 && dp_pct <= 15.0 {
        15.0
    } else if min_years <= 7 {
        10.0
    } else {
        return None;
    };

    Some(Discount::new(
        DiscountKind::PaymentPlan,
        base_price,
        percentage,
        format!("{} years payment plan with {:.0}% down payment", min_years, dp_pct),
    ))
}

/// Discount advertised in a promo text such as `"Summer offer 12.5% off"`.
pub fn promo_discount(base_price: f64, promo_text: &str) -> Option<Discount> {
    let pct = PROMO_PERCENT_RE
        .captures(promo_text)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;
    Some(Discount::new(DiscountKind::Promotional, base_price, pct, promo_text.to_string()))
}

/// Highest percentage wins; ties keep the first candidate.
pub fn best_discount(candidates: &[Discount]) -> Option<&Discount> {
    candidates.iter().fold(None, |best: Option<&Discount>, d| match best {
        Some(b) if b.percentage >= d.percentage => Some(b),
        _ => Some(d),
    })
}

/// Whole-number percentage from a promo text, used by carousels and plans.
pub fn whole_percent(text: &str) -> Option<f64> {
    WHOLE_PERCENT_RE
        .captures(text)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
}

// ============================================================================
// Payment plan
// ============================================================================

#[derive(Debug, Clone)]
pub struct PaymentPlan {
    pub unit_id: i64,
    pub explanation: String,
    pub data: Value,
}

impl PaymentPlan {
    /// Markdown explanation followed by the structured card marker.
    pub fn render(&self) -> String {
        format!("{}\n\n{}{}", self.explanation, PAYMENT_PLAN_MARKER, self.data)
    }
}

struct ActiveOffer {
    has_promo: bool,
    promo_text: Option<String>,
    percentage: Option<f64>,
    discounted_price: Option<f64>,
    source: &'static str,
}

/// Plan discount first; the unit's own promo text only when none applies.
fn active_offer(row: &Row, price: Option<f64>, plan_discount: Option<&Discount>) -> ActiveOffer {
    if let Some(d) = plan_discount {
        return ActiveOffer {
            has_promo: true,
            promo_text: Some(d.description.clone()),
            percentage: Some(d.percentage),
            discounted_price: Some(d.discounted_price),
            source: "Payment Plan Discount",
        };
    }

    let has_promo = is_truthy(row.get("has_promo"));
    let promo_text = text_of(row.get("promo_text"));
    let percentage = match (&promo_text, price) {
        (Some(text), Some(p)) if has_promo && p != 0.0 => whole_percent(text),
        _ => None,
    };
    let discounted_price = match (percentage, price) {
        (Some(pct), Some(p)) => Some(p * (1.0 - pct / 100.0)),
        _ => None,
    };

    ActiveOffer {
        has_promo,
        promo_text,
        percentage,
        discounted_price,
        source: "Main Unit Tables",
    }
}

pub fn build_payment_plan(unit_id: i64, row: &Row) -> PaymentPlan {
    let price = number_of(row.get("price"));
    let price_val = price.unwrap_or(0.0);
    let down_payment = number_of(row.get("down_payment"));
    let deposit = number_of(row.get("deposit"));
    let down_val = down_payment.unwrap_or(0.0);
    let deposit_val = deposit.unwrap_or(0.0);
    let payment_plan_raw = text_of(row.get("payment_plan"));

    let plan_discount = payment_plan_discount(price_val, payment_plan_raw.as_deref(), down_val);
    let offer = active_offer(row, price, plan_discount.as_ref());
    let has_discount = offer.has_promo && offer.discounted_price.is_some();

    let savings = offer.discounted_price.filter(|_| price.is_some()).map(|d| price_val - d);
    let discount_info = offer.has_promo.then(|| {
        json!({
            "has_promo": true,
            "promo_text": offer.promo_text,
            "discount_percentage": offer.percentage,
            "discount_source": offer.source,
            "original_price": price,
            "discounted_price": offer.discounted_price,
            "formatted_original": format_currency(price),
            "formatted_discounted": offer.discounted_price.map(|d| format_currency(Some(d))),
            "savings": savings,
            "formatted_savings": savings.map(|s| format_currency(Some(s))),
        })
    });

    let mut data = json!({
        "unit_id": unit_id,
        "compound": row.get("compound_name").cloned().unwrap_or(Value::Null),
        "location": row.get("region_text").cloned().unwrap_or(Value::Null),
        "developer": row.get("developer_name").cloned().unwrap_or(Value::Null),
        "area": row.get("area").cloned().unwrap_or(Value::Null),
        "bedrooms": row.get("room").cloned().unwrap_or(Value::Null),
        "price": price,
        "formatted_price": format_currency(price),
        "has_discount": has_discount,
        "discount_info": discount_info,
        "down_payment": {
            "amount": row.get("down_payment").cloned().unwrap_or(Value::Null),
            "formatted": format_currency(down_payment),
        },
        "deposit": {
            "amount": row.get("deposit").cloned().unwrap_or(Value::Null),
            "formatted": format_currency(deposit),
        },
        "monthly_installment": {
            "amount": row.get("monthly_installment").cloned().unwrap_or(Value::Null),
            "formatted": format_currency(number_of(row.get("monthly_installment"))),
        },
        "plans": [],
    });

    let mut md = format!(
        "# 💳 **Detailed Payment Plan for Unit #{}**\n\n---\n\n## 🏢 Property Information\n",
        unit_id
    );

    let area = text_of(row.get("area")).filter(|_| is_truthy(row.get("area")));
    let facts: [(&str, Option<String>); 9] = [
        ("Compound", field(row, "compound_name")),
        ("Location", field(row, "region_text")),
        ("Developer", field(row, "developer_name")),
        ("Area", area.map(|a| format!("{} m²", a))),
        ("Bedrooms", field(row, "room")),
        ("Bathrooms", field(row, "bathroom")),
        ("Floor", field(row, "floor")),
        ("Delivery Date", field(row, "delivery_date")),
        ("Status", field(row, "status_text")),
    ];
    for (label, value) in facts {
        if let Some(v) = value {
            let _ = writeln!(md, "- **{}**: {}", label, v);
        }
    }

    match (has_discount, offer.discounted_price) {
        (true, Some(discounted)) => {
            let headline = match &offer.promo_text {
                Some(t) => format!("**{}**", t),
                None => "**Limited Time Discount!**".to_string(),
            };
            let _ = write!(
                md,
                "\n---\n\n## 🎁 **Special Offer Available!**\n\n{}\n\n\
                 - ~~Original Price: {}~~\n\
                 - **Discounted Price: {}** 🎉\n\
                 - **You Save: {}** ({}% off)\n\n",
                headline,
                format_currency(price),
                format_currency(Some(discounted)),
                format_currency(Some(price_val - discounted)),
                offer.percentage.map(format_percent).unwrap_or_default(),
            );
        }
        _ => {
            let _ = write!(md, "\n- **Price**: {}\n", format_currency(price));
        }
    }

    md.push_str("\n---\n\n## 📋 **Payment Structure**\n");

    let mut has_payment_data = false;

    if down_val > 0.0 {
        has_payment_data = true;
        let dp_pct = if price_val > 0.0 { down_val / price_val * 100.0 } else { 0.0 };
        data["down_payment"]["percentage"] = json!((dp_pct * 10.0).round() / 10.0);
        let _ = write!(
            md,
            "\n**1️⃣ Initial Payments**\n\n\
             **Down Payment**: {} ({:.1}% of total price)\n\
             - Initial payment to reserve the unit\n\
             - Typically paid at contract signing\n",
            format_currency(down_payment),
            dp_pct
        );
    }

    if deposit_val > 0.0 {
        has_payment_data = true;
        if !is_truthy(row.get("down_payment")) {
            md.push_str("\n**1️⃣ Initial Payments**\n");
        }
        let _ = write!(
            md,
            "\n**Online Deposit**: {}\n\
             - Additional upfront payment\n\
             - Part of the total price\n",
            format_currency(deposit)
        );
    }

    let years = payment_plan_raw.as_deref().map(plan_years).unwrap_or_default();
    let base_for_balance = offer.discounted_price.unwrap_or(price_val);
    let remaining = base_for_balance - down_val - deposit_val;

    if !years.is_empty() && remaining > 0.0 {
        has_payment_data = true;
        md.push_str("\n**2️⃣ Installment Plans**\n");
        if years.len() > 1 {
            let _ = write!(
                md,
                "\n**📊 Multiple Payment Plan Options Available:**\n\
                 You can choose from **{} different payment periods** to suit your budget:\n",
                years.len()
            );
        } else {
            let _ = write!(md, "\n**Available Payment Period**: {} years\n", years[0]);
        }
        md.push_str("\n**Payment Scenarios**:\n");

        let mut plans = Vec::with_capacity(years.len());
        for period in years {
            let months = u64::from(period) * 12;
            let mut plan_price = price_val;
            if let Some(d) = plan_discount.as_ref().filter(|_| period == 3) {
                let dp_pct = if plan_price > 0.0 { down_val / plan_price * 100.0 } else { 0.0 };
                if dp_pct <= 10.0 {
                    plan_price = d.discounted_price;
                }
            }

            let monthly = (plan_price - down_val - deposit_val) / months as f64;
            let total = monthly * months as f64;
            plans.push(json!({
                "years": period,
                "months": months,
                "monthly_amount": monthly,
                "formatted_monthly": format_currency(Some(monthly)),
                "total_installment_amount": total,
                "formatted_total": format_currency(Some(total)),
            }));

            let _ = write!(
                md,
                "\n**{}-Year Plan**:\n\
                 - Duration: {} months\n\
                 - Monthly: {}\n\
                 - Total via Installments: {}\n",
                period,
                months,
                format_currency(Some(monthly)),
                format_currency(Some(total))
            );
        }
        data["plans"] = Value::Array(plans);
    }

    if !has_payment_data {
        let developer = field(row, "developer_name").unwrap_or_else(|| "Developer".to_string());
        let _ = write!(
            md,
            "\n**⚠️ Payment Plan Not Available**\n\n\
             Unfortunately, detailed payment plan information is not currently available in our database for this unit. This could mean:\n\n\
             - The unit has a custom payment plan (contact developer directly)\n\
             - Payment information is pending update\n\
             - The property may be available for cash purchase only\n\
             - Price is available on request from the developer\n\n\
             **📞 Next Steps**:\n\
             - Contact the developer directly: **{}**\n\
             - Visit the sales office for current offers\n\
             - Request updated payment information from our sales team\n",
            developer
        );
    }

    let _ = write!(
        md,
        "\n---\n\n[🔗 View Full Property]({}/{})\n",
        PROPERTY_LINK_BASE, unit_id
    );

    PaymentPlan { unit_id, explanation: md, data }
}

fn field(row: &Row, key: &str) -> Option<String> {
    if is_truthy(row.get(key)) {
        text_of(row.get(key))
    } else {
        None
    }
}

pub fn plan_not_found(unit_id: i64) -> String {
    json!({
        "error": true,
        "message": format!("No payment plan found for unit ID {}.", unit_id),
    })
    .to_string()
}

// ============================================================================
// Price summary
// ============================================================================

/// Price with the best of the promotional and payment-plan discounts.
pub fn price_with_discount(unit_id: i64, row: Option<&Row>) -> String {
    let Some(row) = row else {
        return format!("❌ Unit ID {} not found or price not available", unit_id);
    };
    let Some(base_price) = number_of(row.get("price")).filter(|p| *p != 0.0) else {
        return format!("❌ Unit ID {} not found or price not available", unit_id);
    };

    let compound = field(row, "compound_name").unwrap_or_else(|| "N/A".to_string());

    let mut candidates = Vec::new();
    if is_truthy(row.get("has_promo")) {
        if let Some(d) = text_of(row.get("promo_text")).and_then(|t| promo_discount(base_price, &t)) {
            candidates.push(d);
        }
    }
    if let Some(d) = payment_plan_discount(
        base_price,
        text_of(row.get("payment_plan")).as_deref(),
        number_of(row.get("down_payment")).unwrap_or(0.0),
    ) {
        candidates.push(d);
    }

    let mut out = format!(
        "## 💰 Price Information for Unit #{}\n\n**Property:** {}\n\n",
        unit_id, compound
    );

    match best_discount(&candidates) {
        Some(best) => {
            out.push_str("### Special Offer! 🎉\n\n");
            let _ = write!(
                out,
                "- **Original Price:** {} EGP\n\
                 - **Best Discounted Price:** {} EGP\n\
                 - **You Save:** {} EGP ({:.1}% off)\n\n",
                group_thousands(base_price),
                group_thousands(best.discounted_price),
                group_thousands(best.amount),
                best.percentage
            );
            if candidates.len() > 1 {
                out.push_str("**All Available Discounts:**\n");
                for d in &candidates {
                    let _ = writeln!(
                        out,
                        "- **{}:** {:.0}% - {}",
                        d.kind.title(),
                        d.percentage,
                        d.description
                    );
                }
            } else {
                let _ = write!(
                    out,
                    "**Discount Type:** {}\n**Details:** {}\n",
                    best.kind.title(),
                    best.description
                );
            }
            out.push('\n');
        }
        None => {
            let _ = write!(
                out,
                "**Price:** {} EGP\n\n\
                 _No active promotions or payment plan discounts for this unit at the moment._\n\n",
                group_thousands(base_price)
            );
        }
    }

    let _ = write!(out, "[View Full Property Details]({}/{})", PROPERTY_LINK_BASE, unit_id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::row;

    fn unit() -> Row {
        row(json!({
            "unit_id": 48213,
            "compound_name": "Madinaty",
            "region_text": "New Cairo",
            "developer_name": "TMG",
            "area": 150,
            "room": 3,
            "bathroom": 2,
            "floor": 0,
            "price": 5_000_000,
            "down_payment": 250_000,
            "deposit": 0,
            "payment_plan": "(3),(7),(3)",
            "has_promo": 0,
            "promo_text": "",
            "status_text": "Available",
        }))
    }

    #[test]
    fn test_thousands_grouping() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.4), "999");
        assert_eq!(group_thousands(1_234_567.6), "1,234,568");
        assert_eq!(format_currency(Some(2_500_000.0)), "2,500,000 EGP");
        assert_eq!(format_currency(Some(0.0)), "Not specified");
        assert_eq!(format_currency(None), "Not specified");
    }

    #[test]
    fn test_plan_years_are_unique_and_positive() {
        assert_eq!(plan_years("(3),(7),(3),(0)"), vec![3, 7]);
        assert!(plan_years("cash").is_empty());
    }

    #[test]
    fn test_plan_discount_tiers() {
        let d = payment_plan_discount(1_000_000.0, Some("(3),(7)"), 50_000.0).unwrap();
        assert_eq!(d.percentage, 21.0);
        assert_eq!(d.description, "3 years payment plan with 5% down payment");
        assert_eq!(payment_plan_discount(1_000_000.0, Some("(5)"), 150_000.0).unwrap().percentage, 15.0);
        assert_eq!(payment_plan_discount(1_000_000.0, Some("(4)"), 300_000.0).unwrap().percentage, 10.0);
        assert!(payment_plan_discount(1_000_000.0, Some("(10)"), 0.0).is_none());
        assert!(payment_plan_discount(1_000_000.0, None, 0.0).is_none());
    }

    #[test]
    fn test_best_discount_prefers_promo_when_larger() {
        let promo = promo_discount(1_000_000.0, "Launch offer 25% off").unwrap();
        let plan = payment_plan_discount(1_000_000.0, Some("(3)"), 0.0).unwrap();
        let all = vec![plan, promo];
        let best = best_discount(&all).unwrap();
        assert_eq!(best.kind, DiscountKind::Promotional);
        assert!((best.discounted_price - 750_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_plan_with_three_year_discount() {
        let plan = build_payment_plan(48213, &unit());
        let md = &plan.explanation;

        assert!(md.starts_with("# 💳 **Detailed Payment Plan for Unit #48213**"));
        assert!(md.contains("- **Area**: 150 m²"));
        assert!(!md.contains("**Floor**"));
        assert!(md.contains("**3 years payment plan with 5% down payment**"));
        assert!(md.contains("(21% off)"));
        assert!(md.contains("**Down Payment**: 250,000 EGP (5.0% of total price)"));
        assert!(md.contains("You can choose from **2 different payment periods**"));
        // 3-year plan uses the discounted 3,950,000; 7-year uses the list price.
        assert!(md.contains("**3-Year Plan**:\n- Duration: 36 months\n- Monthly: 102,778 EGP"));
        assert!(md.contains("**7-Year Plan**:\n- Duration: 84 months\n- Monthly: 56,548 EGP"));
        assert!(md.ends_with("[🔗 View Full Property](https://eshtriaqar.com/en/details/48213)\n"));

        assert_eq!(plan.data["has_discount"], json!(true));
        assert_eq!(plan.data["down_payment"]["percentage"], json!(5.0));
        assert_eq!(plan.data["plans"].as_array().unwrap().len(), 2);
        assert_eq!(plan.data["discount_info"]["discount_source"], json!("Payment Plan Discount"));

        let rendered = plan.render();
        assert!(rendered.contains("\n\n<<PAYMENT_PLAN_DATA>>{"));
    }

    #[test]
    fn test_absurd_plan_length_does_not_overflow() {
        let r = row(json!({
            "unit_id": 9,
            "price": 2000000,
            "down_payment": 500000,
            "payment_plan": "(4294967295)",
        }));
        let plan = build_payment_plan(9, &r);
        assert!(plan.explanation.contains("Duration: 51539607540 months"));
        assert_eq!(plan.data["plans"][0]["months"], json!(51_539_607_540u64));
    }

    #[test]
    fn test_missing_payment_data_names_developer() {
        let r = row(json!({"unit_id": 7, "price": 0, "developer_name": "Palm Hills"}));
        let plan = build_payment_plan(7, &r);
        assert!(plan.explanation.contains("- **Price**: Not specified"));
        assert!(plan.explanation.contains("**⚠️ Payment Plan Not Available**"));
        assert!(plan.explanation.contains("Contact the developer directly: **Palm Hills**"));
        assert_eq!(plan.data["discount_info"], Value::Null);
    }

    #[test]
    fn test_deposit_only_opens_initial_payments() {
        let r = row(json!({"price": 1_000_000, "deposit": 50_000}));
        let md = build_payment_plan(9, &r).explanation;
        assert!(md.contains("\n**1️⃣ Initial Payments**\n\n**Online Deposit**: 50,000 EGP"));
    }

    #[test]
    fn test_unit_promo_used_without_plan_discount() {
        let r = row(json!({"price": 2_000_000, "has_promo": 1, "promo_text": "Eid 10% discount"}));
        let plan = build_payment_plan(11, &r);
        assert!(plan.explanation.contains("**Eid 10% discount**"));
        assert!(plan.explanation.contains("- **Discounted Price: 1,800,000 EGP** 🎉"));
        assert_eq!(plan.data["discount_info"]["discount_source"], json!("Main Unit Tables"));
    }

    #[test]
    fn test_not_found_payload() {
        let v: Value = serde_json::from_str(&plan_not_found(5)).unwrap();
        assert_eq!(v["error"], json!(true));
        assert_eq!(v["message"], json!("No payment plan found for unit ID 5."));
    }

    #[test]
    fn test_price_summary() {
        let out = price_with_discount(48213, Some(&unit()));
        assert!(out.contains("- **Original Price:** 5,000,000 EGP"));
        assert!(out.contains("- **Best Discounted Price:** 3,950,000 EGP"));
        assert!(out.contains("**Discount Type:** Payment_Plan"));

        let plain = row(json!({"price": 900_000, "payment_plan": "(10)"}));
        assert!(price_with_discount(1, Some(&plain)).contains("_No active promotions"));
        assert!(price_with_discount(2, None).starts_with("❌ Unit ID 2 not found"));
    }
}
