//! Fee aggregation.
//!
//! Folds fee structures, payments and discounts into per-class summaries, a
//! per-tenant summary, and a per-student component breakdown. All inputs are
//! rows of a single tenant.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::ordering::{natural_cmp, ClassOrdering};
use super::{de_amount, de_flag, de_id, de_opt_amount, de_opt_id, percent, round2, yes};

#[derive(Debug, Clone, Deserialize)]
pub struct ClassRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub section: Option<String>,
}

impl ClassRow {
    pub fn display_name(&self) -> String {
        match self.section.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(section) => format!("{} - {}", self.class_name, section),
            None => self.class_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeStructureRow {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub class_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub student_id: Option<String>,
    #[serde(default)]
    pub fee_component: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub base_amount: Option<f64>,
    #[serde(default, deserialize_with = "de_amount")]
    pub discount_applied: f64,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub academic_year: Option<String>,
}

impl FeeStructureRow {
    /// Pre-discount amount; a missing or zero base falls back to `amount`.
    pub fn base(&self) -> f64 {
        match self.base_amount {
            Some(b) if b != 0.0 => b,
            _ => self.amount,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRow {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(deserialize_with = "de_id")]
    pub student_id: String,
    #[serde(default)]
    pub fee_component: Option<String>,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount_paid: f64,
    #[serde(default)]
    pub payment_date: Option<String>,
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default)]
    pub academic_year: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

impl From<String> for DiscountKind {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "percentage" | "percent" => DiscountKind::Percentage,
            _ => DiscountKind::Fixed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscountRow {
    #[serde(deserialize_with = "de_id")]
    pub student_id: String,
    #[serde(default)]
    pub fee_component: Option<String>,
    pub discount_type: DiscountKind,
    #[serde(default, deserialize_with = "de_amount")]
    pub discount_value: f64,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default = "yes", deserialize_with = "de_flag")]
    pub is_active: bool,
}

impl DiscountRow {
    /// Null, empty and `ALL` apply to every component.
    pub fn applies_to(&self, component: &str) -> bool {
        match self.fee_component.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(c) if c.eq_ignore_ascii_case("all") => true,
            Some(c) => c == component,
        }
    }

    fn amount_on(&self, base: f64) -> f64 {
        match self.discount_type {
            DiscountKind::Percentage => base * self.discount_value / 100.0,
            DiscountKind::Fixed => self.discount_value,
        }
    }
}

/// Raw rows of one tenant, as fetched.
#[derive(Debug, Clone, Default)]
pub struct FeeInputs {
    pub classes: Vec<ClassRow>,
    pub students: Vec<StudentRow>,
    pub fee_structures: Vec<FeeStructureRow>,
    pub payments: Vec<PaymentRow>,
    pub discounts: Vec<DiscountRow>,
}

/// `2024-2025` becomes `2024-25`; anything else is kept (trimmed).
pub fn normalize_academic_year(year: &str) -> String {
    let year = year.trim();
    if let Some((start, end)) = year.split_once('-') {
        if end.len() == 4 && end.chars().all(|c| c.is_ascii_digit()) {
            if let Some(short) = end.get(2..) {
                return format!("{start}-{short}");
            }
        }
    }
    year.to_string()
}

fn year_key(year: Option<&str>) -> String {
    year.map(normalize_academic_year).unwrap_or_default()
}

/// Rows without a year match every period.
fn in_period(row_year: Option<&str>, period: Option<&str>) -> bool {
    match period {
        None => true,
        Some(p) => {
            let y = year_key(row_year);
            y.is_empty() || y == p
        }
    }
}

/// Class-level rows of the student's class, with a student-specific row
/// replacing class rows of the same component and adding new components.
pub fn applicable_fees<'a>(
    student_id: &str,
    class_id: Option<&str>,
    fees: &'a [FeeStructureRow],
) -> Vec<&'a FeeStructureRow> {
    let specific: Vec<&FeeStructureRow> = fees
        .iter()
        .filter(|f| f.student_id.as_deref() == Some(student_id))
        .collect();
    let overridden: HashSet<&str> = specific.iter().map(|f| f.fee_component.as_str()).collect();
    let mut out: Vec<&FeeStructureRow> = fees
        .iter()
        .filter(|f| {
            f.student_id.is_none()
                && class_id.is_some()
                && f.class_id.as_deref() == class_id
                && !overridden.contains(f.fee_component.as_str())
        })
        .collect();
    out.extend(specific);
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StudentTotals {
    pub expected: f64,
    pub paid: f64,
    pub discount: f64,
}

impl StudentTotals {
    pub fn outstanding(&self) -> f64 {
        outstanding(self.expected, self.paid, self.discount)
    }
}

pub fn outstanding(expected: f64, paid: f64, discount: f64) -> f64 {
    (expected - paid - discount).max(0.0)
}

/// Two-decimal collection rate, 0 when nothing is expected.
pub fn collection_rate(paid: f64, expected: f64) -> f64 {
    round2(percent(paid, expected))
}

pub fn student_totals(
    applicable: &[&FeeStructureRow],
    payments: &[&PaymentRow],
    discounts: &[&DiscountRow],
) -> StudentTotals {
    let expected = applicable.iter().map(|f| f.amount).sum();
    let paid = payments.iter().map(|p| p.amount_paid).sum();
    let discount = discounts
        .iter()
        .filter(|d| d.is_active)
        .map(|d| {
            let base: f64 = applicable
                .iter()
                .filter(|f| d.applies_to(&f.fee_component))
                .map(|f| f.base())
                .sum();
            d.amount_on(base)
        })
        .sum();
    StudentTotals {
        expected,
        paid,
        discount,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassFeeSummary {
    pub class_id: String,
    pub class_name: String,
    pub total_students: usize,
    pub total_expected_fees: f64,
    pub total_paid: f64,
    pub total_discounts: f64,
    pub outstanding: f64,
    pub collection_rate: f64,
    pub students_with_payments: usize,
    pub students_without_payments: usize,
    pub students_with_discounts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSummary {
    pub total_due: f64,
    pub total_collected: f64,
    pub total_discounts: f64,
    pub total_outstanding: f64,
    pub collection_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FeeAnomaly {
    /// Money came in but nothing was expected from this student.
    #[serde(rename_all = "camelCase")]
    PaymentWithoutFeeStructure {
        student_id: String,
        class_id: Option<String>,
        paid: f64,
    },
    #[serde(rename_all = "camelCase")]
    PaymentForUnknownStudent { student_id: String, amount: f64 },
    #[serde(rename_all = "camelCase")]
    StudentWithoutClass { student_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOverview {
    pub academic_year: Option<String>,
    pub ordering: ClassOrdering,
    pub classes: Vec<ClassFeeSummary>,
    pub summary: FeeSummary,
    pub anomalies: Vec<FeeAnomaly>,
}

fn group_by_student<'a, T>(rows: &'a [T], key: impl Fn(&T) -> &str) -> HashMap<&'a str, Vec<&'a T>> {
    let mut map: HashMap<&str, Vec<&T>> = HashMap::new();
    for row in rows {
        map.entry(key(row)).or_default().push(row);
    }
    map
}

pub fn fee_overview(inputs: &FeeInputs, academic_year: Option<&str>, ordering: ClassOrdering) -> FeeOverview {
    let period = academic_year
        .map(normalize_academic_year)
        .filter(|p| !p.is_empty());
    let period = period.as_deref();

    let fees: Vec<FeeStructureRow> = inputs
        .fee_structures
        .iter()
        .filter(|f| in_period(f.academic_year.as_deref(), period))
        .cloned()
        .collect();
    let payments: Vec<&PaymentRow> = inputs
        .payments
        .iter()
        .filter(|p| in_period(p.academic_year.as_deref(), period))
        .collect();
    let discounts: Vec<&DiscountRow> = inputs
        .discounts
        .iter()
        .filter(|d| d.is_active && in_period(d.academic_year.as_deref(), period))
        .collect();

    let payments_by_student = group_by_student(&payments, |p| p.student_id.as_str());
    let discounts_by_student = group_by_student(&discounts, |d| d.student_id.as_str());
    let known_classes: HashSet<&str> = inputs.classes.iter().map(|c| c.id.as_str()).collect();
    let known_students: HashSet<&str> = inputs.students.iter().map(|s| s.id.as_str()).collect();

    let mut anomalies = Vec::new();
    let mut classes = Vec::with_capacity(inputs.classes.len());

    for class in &inputs.classes {
        let mut expected = 0.0;
        let mut paid = 0.0;
        let mut discount = 0.0;
        let mut total_students = 0;
        let mut with_payments = 0;
        let mut with_discounts = 0;

        for student in inputs
            .students
            .iter()
            .filter(|s| s.class_id.as_deref() == Some(class.id.as_str()))
        {
            total_students += 1;
            let applicable = applicable_fees(&student.id, Some(class.id.as_str()), &fees);
            let student_payments: Vec<&PaymentRow> = payments_by_student
                .get(student.id.as_str())
                .map(|v| v.iter().map(|p| **p).collect())
                .unwrap_or_default();
            let student_discounts: Vec<&DiscountRow> = discounts_by_student
                .get(student.id.as_str())
                .map(|v| v.iter().map(|d| **d).collect())
                .unwrap_or_default();
            let totals = student_totals(&applicable, &student_payments, &student_discounts);

            if totals.paid > 0.0 {
                with_payments += 1;
                if totals.expected == 0.0 {
                    anomalies.push(FeeAnomaly::PaymentWithoutFeeStructure {
                        student_id: student.id.clone(),
                        class_id: Some(class.id.clone()),
                        paid: round2(totals.paid),
                    });
                }
            }
            if totals.discount > 0.0 {
                with_discounts += 1;
            }
            expected += totals.expected;
            paid += totals.paid;
            discount += totals.discount;
        }

        classes.push(ClassFeeSummary {
            class_id: class.id.clone(),
            class_name: class.display_name(),
            total_students,
            total_expected_fees: round2(expected),
            total_paid: round2(paid),
            total_discounts: round2(discount),
            outstanding: round2(outstanding(expected, paid, discount)),
            collection_rate: collection_rate(paid, expected),
            students_with_payments: with_payments,
            students_without_payments: total_students - with_payments,
            students_with_discounts: with_discounts,
        });
    }

    for student in &inputs.students {
        let placed = student
            .class_id
            .as_deref()
            .map(|c| known_classes.contains(c))
            .unwrap_or(false);
        if !placed {
            anomalies.push(FeeAnomaly::StudentWithoutClass {
                student_id: student.id.clone(),
            });
        }
    }

    let mut unknown: Vec<(&str, f64)> = Vec::new();
    for p in &payments {
        if known_students.contains(p.student_id.as_str()) {
            continue;
        }
        match unknown.iter_mut().find(|(id, _)| *id == p.student_id) {
            Some((_, amount)) => *amount += p.amount_paid,
            None => unknown.push((p.student_id.as_str(), p.amount_paid)),
        }
    }
    anomalies.extend(unknown.into_iter().map(|(id, amount)| FeeAnomaly::PaymentForUnknownStudent {
        student_id: id.to_string(),
        amount: round2(amount),
    }));

    let total_due: f64 = classes.iter().map(|c| c.total_expected_fees).sum();
    let total_collected: f64 = classes.iter().map(|c| c.total_paid).sum();
    let total_discounts: f64 = classes.iter().map(|c| c.total_discounts).sum();
    let total_outstanding: f64 = classes.iter().map(|c| c.outstanding).sum();

    match ordering {
        ClassOrdering::Outstanding => classes.sort_by(|a, b| {
            b.outstanding
                .total_cmp(&a.outstanding)
                .then_with(|| natural_cmp(&a.class_name, &b.class_name))
        }),
        ClassOrdering::Natural => classes.sort_by(|a, b| natural_cmp(&a.class_name, &b.class_name)),
    }

    FeeOverview {
        academic_year: period.map(str::to_string),
        ordering,
        classes,
        summary: FeeSummary {
            total_due: round2(total_due),
            total_collected: round2(total_collected),
            total_discounts: round2(total_discounts),
            total_outstanding: round2(total_outstanding),
            collection_rate: collection_rate(total_collected, total_due),
        },
        anomalies,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    NoFee,
    Paid,
    Partial,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLine {
    pub id: Option<String>,
    pub fee_component: Option<String>,
    pub amount: f64,
    pub payment_date: Option<String>,
    pub payment_mode: Option<String>,
    pub academic_year: Option<String>,
}

impl From<&PaymentRow> for PaymentLine {
    fn from(p: &PaymentRow) -> Self {
        Self {
            id: p.id.clone(),
            fee_component: p.fee_component.clone(),
            amount: p.amount_paid,
            payment_date: p.payment_date.clone(),
            payment_mode: p.payment_mode.clone(),
            academic_year: p.academic_year.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFee {
    pub fee_id: Option<String>,
    pub fee_component: String,
    pub academic_year: String,
    pub due_date: Option<String>,
    pub base_amount: f64,
    pub structure_discount: f64,
    pub individual_discount: f64,
    pub total_discount: f64,
    pub final_amount: f64,
    /// Capped at `final_amount`; overpayment shows in `actual_paid_amount`.
    pub paid_amount: f64,
    pub actual_paid_amount: f64,
    pub remaining_amount: f64,
    pub status: FeeStatus,
    pub payments: Vec<PaymentLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFeeBreakdown {
    pub student_id: String,
    pub student_name: String,
    pub class_id: Option<String>,
    pub academic_year: Option<String>,
    pub components: Vec<ComponentFee>,
    pub unmatched_payments: Vec<PaymentLine>,
    pub total_base: f64,
    pub total_discounts: f64,
    pub total_due: f64,
    pub total_paid: f64,
    pub total_outstanding: f64,
}

fn alnum(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Exact, then case-insensitive, then alphanumeric-normalised, then
/// substring when both normalised names are longer than three characters.
pub fn component_matches(payment_component: &str, fee_component: &str) -> bool {
    if payment_component.is_empty() {
        return false;
    }
    if payment_component == fee_component || payment_component.eq_ignore_ascii_case(fee_component) {
        return true;
    }
    let p = alnum(payment_component);
    let f = alnum(fee_component);
    if p.is_empty() || f.is_empty() {
        return false;
    }
    p == f || (p.len() > 3 && f.len() > 3 && (p.contains(&f) || f.contains(&p)))
}

fn year_matches(payment_year: Option<&str>, fee_year: &str) -> bool {
    let y = year_key(payment_year);
    y.is_empty() || fee_year.is_empty() || y == fee_year
}

struct ComponentGroup<'a> {
    component: &'a str,
    year: String,
    rows: Vec<&'a FeeStructureRow>,
}

pub fn student_fee_breakdown(
    student: &StudentRow,
    fees: &[FeeStructureRow],
    payments: &[PaymentRow],
    discounts: &[DiscountRow],
    academic_year: Option<&str>,
) -> StudentFeeBreakdown {
    let period = academic_year
        .map(normalize_academic_year)
        .filter(|p| !p.is_empty());
    let period = period.as_deref();

    let mut groups: Vec<ComponentGroup> = Vec::new();
    for fee in applicable_fees(&student.id, student.class_id.as_deref(), fees)
        .into_iter()
        .filter(|f| in_period(f.academic_year.as_deref(), period))
    {
        let year = year_key(fee.academic_year.as_deref());
        match groups
            .iter_mut()
            .find(|g| g.component == fee.fee_component && g.year == year)
        {
            Some(g) => g.rows.push(fee),
            None => groups.push(ComponentGroup {
                component: &fee.fee_component,
                year,
                rows: vec![fee],
            }),
        }
    }

    let student_payments: Vec<&PaymentRow> = payments
        .iter()
        .filter(|p| p.student_id == student.id && in_period(p.academic_year.as_deref(), period))
        .collect();
    let student_discounts: Vec<&DiscountRow> = discounts
        .iter()
        .filter(|d| d.student_id == student.id && d.is_active)
        .collect();

    let mut used = vec![false; student_payments.len()];
    let mut components = Vec::with_capacity(groups.len());

    for group in &groups {
        let base: f64 = group.rows.iter().map(|f| f.base()).sum();
        let structure_discount: f64 = group.rows.iter().map(|f| f.discount_applied).sum();
        let individual_discount: f64 = student_discounts
            .iter()
            .filter(|d| d.applies_to(group.component) && year_matches(d.academic_year.as_deref(), &group.year))
            .map(|d| d.amount_on(base).min(base))
            .sum();
        let total_discount = structure_discount + individual_discount;
        let final_amount = (base - total_discount).max(0.0);

        let mut matched = Vec::new();
        for (i, p) in student_payments.iter().enumerate() {
            if used[i] {
                continue;
            }
            let component_ok = p
                .fee_component
                .as_deref()
                .map(|c| component_matches(c.trim(), group.component))
                .unwrap_or(false);
            if component_ok && year_matches(p.academic_year.as_deref(), &group.year) {
                used[i] = true;
                matched.push(*p);
            }
        }
        let actual_paid: f64 = matched.iter().map(|p| p.amount_paid).sum();

        let status = if base == 0.0 {
            FeeStatus::NoFee
        } else if actual_paid >= final_amount {
            FeeStatus::Paid
        } else if actual_paid > 0.0 {
            FeeStatus::Partial
        } else {
            FeeStatus::Pending
        };

        components.push(ComponentFee {
            fee_id: group.rows.first().and_then(|f| f.id.clone()),
            fee_component: group.component.to_string(),
            academic_year: group.year.clone(),
            due_date: group.rows.first().and_then(|f| f.due_date.clone()),
            base_amount: round2(base),
            structure_discount: round2(structure_discount),
            individual_discount: round2(individual_discount),
            total_discount: round2(total_discount),
            final_amount: round2(final_amount),
            paid_amount: round2(actual_paid.min(final_amount)),
            actual_paid_amount: round2(actual_paid),
            remaining_amount: round2((final_amount - actual_paid).max(0.0)),
            status,
            payments: matched.into_iter().map(PaymentLine::from).collect(),
        });
    }

    let unmatched_payments = student_payments
        .iter()
        .zip(&used)
        .filter(|(_, u)| !**u)
        .map(|(p, _)| PaymentLine::from(*p))
        .collect();

    StudentFeeBreakdown {
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        class_id: student.class_id.clone(),
        academic_year: period.map(str::to_string),
        total_base: round2(components.iter().map(|c| c.base_amount).sum()),
        total_discounts: round2(components.iter().map(|c| c.total_discount).sum()),
        total_due: round2(components.iter().map(|c| c.final_amount).sum()),
        total_paid: round2(components.iter().map(|c| c.paid_amount).sum()),
        total_outstanding: round2(components.iter().map(|c| c.remaining_amount).sum()),
        components,
        unmatched_payments,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPayment {
    pub student_id: String,
    pub student_name: String,
    #[serde(flatten)]
    pub payment: PaymentLine,
}

/// Newest first. Payments of students outside the list are skipped.
pub fn recent_payments(students: &[StudentRow], payments: &[PaymentRow], limit: usize) -> Vec<RecentPayment> {
    let names: HashMap<&str, &str> = students
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();
    let mut out: Vec<RecentPayment> = payments
        .iter()
        .filter_map(|p| {
            names.get(p.student_id.as_str()).map(|name| RecentPayment {
                student_id: p.student_id.clone(),
                student_name: name.to_string(),
                payment: PaymentLine::from(p),
            })
        })
        .collect();
    out.sort_by(|a, b| b.payment.payment_date.cmp(&a.payment.payment_date));
    out.truncate(limit);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn class(id: &str, name: &str) -> ClassRow {
        ClassRow {
            id: id.into(),
            class_name: name.into(),
            section: None,
        }
    }

    fn student(id: &str, class_id: Option<&str>) -> StudentRow {
        StudentRow {
            id: id.into(),
            name: format!("Student {id}"),
            class_id: class_id.map(str::to_string),
        }
    }

    fn fee(class_id: Option<&str>, student_id: Option<&str>, component: &str, amount: f64) -> FeeStructureRow {
        FeeStructureRow {
            id: Some(format!("fee-{component}-{}", student_id.unwrap_or("class"))),
            class_id: class_id.map(str::to_string),
            student_id: student_id.map(str::to_string),
            fee_component: component.into(),
            amount,
            base_amount: None,
            discount_applied: 0.0,
            due_date: None,
            academic_year: None,
        }
    }

    fn payment(student_id: &str, component: &str, amount: f64, date: &str) -> PaymentRow {
        PaymentRow {
            id: Some(format!("pay-{student_id}-{date}")),
            student_id: student_id.into(),
            fee_component: Some(component.into()),
            amount_paid: amount,
            payment_date: Some(date.into()),
            payment_mode: Some("Cash".into()),
            academic_year: None,
        }
    }

    fn discount(student_id: &str, component: Option<&str>, kind: DiscountKind, value: f64) -> DiscountRow {
        DiscountRow {
            student_id: student_id.into(),
            fee_component: component.map(str::to_string),
            discount_type: kind,
            discount_value: value,
            academic_year: None,
            is_active: true,
        }
    }

    #[test]
    fn overpayment_with_percentage_discount_never_goes_negative() {
        let inputs = FeeInputs {
            classes: vec![class("c1", "5")],
            students: vec![student("s1", Some("c1"))],
            fee_structures: vec![fee(Some("c1"), None, "Tuition", 500.0)],
            payments: vec![payment("s1", "Tuition", 1000.0, "2024-06-01")],
            discounts: vec![discount("s1", Some("Tuition"), DiscountKind::Percentage, 10.0)],
        };
        let overview = fee_overview(&inputs, None, ClassOrdering::Outstanding);
        let c = &overview.classes[0];
        assert_eq!(c.total_expected_fees, 500.0);
        assert_eq!(c.total_discounts, 50.0);
        assert_eq!(c.total_paid, 1000.0);
        assert_eq!(c.outstanding, 0.0);
        assert_eq!(c.collection_rate, 200.0);
    }

    #[test]
    fn class_with_no_students_or_fees_is_all_zero() {
        let inputs = FeeInputs {
            classes: vec![class("c1", "1"), class("c2", "2")],
            students: (0..10).map(|i| student(&format!("s{i}"), Some("c1"))).collect(),
            fee_structures: vec![fee(Some("c1"), None, "Tuition", 100.0)],
            ..FeeInputs::default()
        };
        let overview = fee_overview(&inputs, None, ClassOrdering::Natural);
        let empty = overview.classes.iter().find(|c| c.class_id == "c2").expect("c2");
        assert_eq!(empty.total_students, 0);
        assert_eq!(empty.total_expected_fees, 0.0);
        assert_eq!(empty.collection_rate, 0.0);
        assert!(empty.collection_rate.is_finite());

        let full = overview.classes.iter().find(|c| c.class_id == "c1").expect("c1");
        assert_eq!(full.total_expected_fees, 1000.0);
        assert_eq!(full.outstanding, 1000.0);
        assert_eq!(overview.summary.total_outstanding, 1000.0);
        assert_eq!(overview.summary.collection_rate, 0.0);
    }

    #[test]
    fn student_specific_row_replaces_and_extends_class_rows() {
        let fees = vec![
            fee(Some("c1"), None, "Tuition", 1000.0),
            fee(Some("c1"), None, "Bus", 200.0),
            fee(Some("c1"), Some("s1"), "Tuition", 800.0),
            fee(None, Some("s1"), "Hostel", 300.0),
            fee(Some("c1"), Some("s2"), "Tuition", 1.0),
        ];
        let applicable = applicable_fees("s1", Some("c1"), &fees);
        let mut got: Vec<(&str, f64)> = applicable
            .iter()
            .map(|f| (f.fee_component.as_str(), f.amount))
            .collect();
        got.sort_by(|a, b| a.0.cmp(b.0));
        assert_eq!(got, vec![("Bus", 200.0), ("Hostel", 300.0), ("Tuition", 800.0)]);
    }

    #[test]
    fn all_component_discount_uses_every_base_and_fixed_applies_as_is() {
        let mut tuition = fee(Some("c1"), None, "Tuition", 900.0);
        tuition.base_amount = Some(1000.0);
        let fees = vec![tuition, fee(Some("c1"), None, "Bus", 200.0)];
        let applicable = applicable_fees("s1", Some("c1"), &fees);
        let pct = discount("s1", Some("ALL"), DiscountKind::Percentage, 10.0);
        let fixed = discount("s1", Some("Bus"), DiscountKind::Fixed, 25.0);
        let totals = student_totals(&applicable, &[], &[&pct, &fixed]);
        assert_eq!(totals.expected, 1100.0);
        assert_eq!(totals.discount, 120.0 + 25.0);
    }

    #[test]
    fn period_filter_normalises_years_and_keeps_undated_rows() {
        let mut current = fee(Some("c1"), None, "Tuition", 500.0);
        current.academic_year = Some("2024-2025".into());
        let mut old = fee(Some("c1"), None, "Exam", 70.0);
        old.academic_year = Some("2023-24".into());
        let undated = fee(Some("c1"), None, "Bus", 30.0);
        let inputs = FeeInputs {
            classes: vec![class("c1", "1")],
            students: vec![student("s1", Some("c1"))],
            fee_structures: vec![current, old, undated],
            ..FeeInputs::default()
        };
        let overview = fee_overview(&inputs, Some("2024-25"), ClassOrdering::Outstanding);
        assert_eq!(overview.classes[0].total_expected_fees, 530.0);
        assert_eq!(overview.academic_year.as_deref(), Some("2024-25"));
        assert_eq!(normalize_academic_year("2024-2025"), "2024-25");
        assert_eq!(normalize_academic_year("2024-25"), "2024-25");
    }

    #[test]
    fn malformed_years_are_left_alone() {
        assert_eq!(normalize_academic_year("2024-a€"), "2024-a€");
        assert_eq!(normalize_academic_year("2024-20x5"), "2024-20x5");
        assert_eq!(normalize_academic_year(" 2024-€ "), "2024-€");
        assert_eq!(normalize_academic_year("2024-2025-26"), "2024-2025-26");
    }

    #[test]
    fn anomalies_are_surfaced() {
        let inputs = FeeInputs {
            classes: vec![class("c1", "1")],
            students: vec![student("s1", Some("c1")), student("s2", None)],
            payments: vec![
                payment("s1", "Tuition", 100.0, "2024-06-01"),
                payment("ghost", "Tuition", 40.0, "2024-06-02"),
                payment("ghost", "Bus", 10.0, "2024-06-03"),
            ],
            ..FeeInputs::default()
        };
        let overview = fee_overview(&inputs, None, ClassOrdering::Outstanding);
        assert!(overview.anomalies.contains(&FeeAnomaly::PaymentWithoutFeeStructure {
            student_id: "s1".into(),
            class_id: Some("c1".into()),
            paid: 100.0,
        }));
        assert!(overview.anomalies.contains(&FeeAnomaly::StudentWithoutClass {
            student_id: "s2".into()
        }));
        assert!(overview.anomalies.contains(&FeeAnomaly::PaymentForUnknownStudent {
            student_id: "ghost".into(),
            amount: 50.0,
        }));
    }

    #[test]
    fn outstanding_ordering_puts_riskiest_class_first() {
        let inputs = FeeInputs {
            classes: vec![class("c1", "1"), class("c2", "2"), class("c3", "3")],
            students: vec![student("a", Some("c1")), student("b", Some("c2")), student("c", Some("c3"))],
            fee_structures: vec![
                fee(Some("c1"), None, "Tuition", 100.0),
                fee(Some("c2"), None, "Tuition", 900.0),
                fee(Some("c3"), None, "Tuition", 100.0),
            ],
            ..FeeInputs::default()
        };
        let ids: Vec<String> = fee_overview(&inputs, None, ClassOrdering::Outstanding)
            .classes
            .into_iter()
            .map(|c| c.class_id)
            .collect();
        assert_eq!(ids, vec!["c2", "c1", "c3"]);
    }

    #[test]
    fn breakdown_matches_payments_once_and_reports_status() {
        let s = student("s1", Some("c1"));
        let mut tuition = fee(Some("c1"), None, "Tuition Fee", 1000.0);
        tuition.discount_applied = 100.0;
        let fees = vec![tuition, fee(Some("c1"), None, "Bus", 200.0), fee(Some("c1"), None, "Library", 0.0)];
        let payments = vec![
            payment("s1", "tuition fee", 500.0, "2024-06-01"),
            payment("s1", "TuitionFee", 400.0, "2024-07-01"),
            payment("s1", "Sports", 50.0, "2024-07-02"),
        ];
        let discounts = vec![discount("s1", Some("Bus"), DiscountKind::Fixed, 500.0)];
        let b = student_fee_breakdown(&s, &fees, &payments, &discounts, None);

        let tuition = b.components.iter().find(|c| c.fee_component == "Tuition Fee").expect("tuition");
        assert_eq!(tuition.final_amount, 900.0);
        assert_eq!(tuition.actual_paid_amount, 900.0);
        assert_eq!(tuition.status, FeeStatus::Paid);

        let bus = b.components.iter().find(|c| c.fee_component == "Bus").expect("bus");
        assert_eq!(bus.individual_discount, 200.0, "discount capped at base");
        assert_eq!(bus.final_amount, 0.0);
        assert_eq!(bus.status, FeeStatus::Paid);

        let library = b.components.iter().find(|c| c.fee_component == "Library").expect("library");
        assert_eq!(library.status, FeeStatus::NoFee);

        assert_eq!(b.unmatched_payments.len(), 1);
        assert_eq!(b.unmatched_payments[0].fee_component.as_deref(), Some("Sports"));
        assert_eq!(b.total_outstanding, 0.0);
    }

    #[test]
    fn partial_and_pending_statuses() {
        let s = student("s1", Some("c1"));
        let fees = vec![fee(Some("c1"), None, "Tuition", 1000.0), fee(Some("c1"), None, "Exam", 100.0)];
        let payments = vec![payment("s1", "Tuition", 250.0, "2024-06-01")];
        let b = student_fee_breakdown(&s, &fees, &payments, &[], None);
        let status = |name: &str| {
            b.components
                .iter()
                .find(|c| c.fee_component == name)
                .map(|c| c.status)
        };
        assert_eq!(status("Tuition"), Some(FeeStatus::Partial));
        assert_eq!(status("Exam"), Some(FeeStatus::Pending));
        assert_eq!(b.total_outstanding, 850.0);
    }

    #[test]
    fn component_matching_rules() {
        assert!(component_matches("Tuition", "tuition"));
        assert!(component_matches("Tuition-Fee", "tuition fee"));
        assert!(component_matches("Term 1 Tuition", "tuition"));
        assert!(!component_matches("Bus", "Bus Fee"), "short names need an exact match");
        assert!(!component_matches("", "Tuition"));
    }

    #[test]
    fn recent_payments_newest_first_and_limited() {
        let students = vec![student("s1", Some("c1"))];
        let payments = vec![
            payment("s1", "Tuition", 1.0, "2024-01-01"),
            payment("s1", "Tuition", 2.0, "2024-03-01"),
            payment("s1", "Tuition", 3.0, "2024-02-01"),
            payment("other", "Tuition", 9.0, "2024-04-01"),
        ];
        let recent = recent_payments(&students, &payments, 2);
        let amounts: Vec<f64> = recent.iter().map(|r| r.payment.amount).collect();
        assert_eq!(amounts, vec![2.0, 3.0]);
        assert_eq!(recent[0].student_name, "Student s1");
    }

    #[test]
    fn rows_decode_leniently() {
        let row = serde_json::json!({
            "student_id": 42,
            "fee_component": "ALL",
            "discount_type": "fixed_amount",
            "discount_value": "150.5",
            "is_active": 1
        });
        let d: DiscountRow = serde_json::from_value(row).expect("decode");
        assert_eq!(d.student_id, "42");
        assert_eq!(d.discount_type, DiscountKind::Fixed);
        assert_eq!(d.discount_value, 150.5);
        assert!(d.is_active);
        assert!(d.applies_to("Anything"));
    }

    proptest! {
        #[test]
        fn outstanding_is_never_negative(
            expected in 0.0f64..1e7,
            paid in 0.0f64..1e7,
            discount in 0.0f64..1e7,
        ) {
            let o = outstanding(expected, paid, discount);
            prop_assert!(o >= 0.0);
            prop_assert!(o <= expected);
        }

        #[test]
        fn collection_rate_is_finite(paid in 0.0f64..1e7, expected in 0.0f64..1e7) {
            prop_assert!(collection_rate(paid, expected).is_finite());
        }
    }
}
