//! Expense spending against category budgets.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{de_amount, de_opt_id, percent, round1, round2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpensePeriod {
    Month { year: i32, month: u32 },
    Year(i32),
}

impl ExpensePeriod {
    /// `YYYY-MM`
    pub fn parse_month(s: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d").ok()?;
        Some(ExpensePeriod::Month {
            year: date.year(),
            month: date.month(),
        })
    }

    /// `YYYY`
    pub fn parse_year(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 4 {
            return None;
        }
        s.parse::<i32>().ok().map(ExpensePeriod::Year)
    }

    /// Inclusive `expense_date` bounds as ISO dates.
    pub fn bounds(&self) -> Option<(String, String)> {
        let (first, last) = match *self {
            ExpensePeriod::Month { year, month } => {
                let first = NaiveDate::from_ymd_opt(year, month, 1)?;
                let next = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)?
                };
                (first, next.pred_opt()?)
            }
            ExpensePeriod::Year(year) => (
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            ),
        };
        Some((
            first.format("%Y-%m-%d").to_string(),
            last.format("%Y-%m-%d").to_string(),
        ))
    }

    pub fn label(&self) -> String {
        match *self {
            ExpensePeriod::Month { year, month } => format!("{year:04}-{month:02}"),
            ExpensePeriod::Year(year) => format!("{year:04}"),
        }
    }

    /// Monthly budgets are scaled up for a yearly view.
    pub fn budget_months(&self) -> f64 {
        match self {
            ExpensePeriod::Month { .. } => 1.0,
            ExpensePeriod::Year(_) => 12.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseRow {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub expense_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRow {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub monthly_budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpend {
    pub name: String,
    pub amount: f64,
    pub budget: f64,
    pub count: usize,
    /// Share of the period's total spend.
    pub percentage: f64,
    pub budget_usage: f64,
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Uncategorised {
    pub amount: f64,
    pub count: usize,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseReport {
    pub period: String,
    pub total_expenses: f64,
    pub total_budget: f64,
    pub budget_usage: f64,
    pub categories: Vec<CategorySpend>,
    pub uncategorised: Uncategorised,
}

/// Categories keep their input order. Expenses whose category is not a
/// known category name go to `uncategorised`.
pub fn category_breakdown(period: ExpensePeriod, expenses: &[ExpenseRow], categories: &[CategoryRow]) -> ExpenseReport {
    let total: f64 = expenses.iter().map(|e| e.amount).sum();
    let months = period.budget_months();

    let spends: Vec<CategorySpend> = categories
        .iter()
        .map(|cat| {
            let (amount, count) = expenses
                .iter()
                .filter(|e| e.category.as_deref() == Some(cat.name.as_str()))
                .fold((0.0, 0), |(sum, n), e| (sum + e.amount, n + 1));
            let budget = cat.monthly_budget * months;
            CategorySpend {
                name: cat.name.clone(),
                amount: round2(amount),
                budget: round2(budget),
                count,
                percentage: round1(percent(amount, total)),
                budget_usage: round1(percent(amount, budget)),
                over_budget: budget > 0.0 && amount > budget,
            }
        })
        .collect();

    let mut uncategorised = Uncategorised {
        amount: 0.0,
        count: 0,
        names: Vec::new(),
    };
    for e in expenses {
        let known = e
            .category
            .as_deref()
            .map(|c| categories.iter().any(|cat| cat.name == c))
            .unwrap_or(false);
        if known {
            continue;
        }
        uncategorised.amount += e.amount;
        uncategorised.count += 1;
        let name = e.category.clone().unwrap_or_default();
        if !uncategorised.names.contains(&name) {
            uncategorised.names.push(name);
        }
    }
    uncategorised.amount = round2(uncategorised.amount);

    let total_budget: f64 = categories.iter().map(|c| c.monthly_budget * months).sum();
    ExpenseReport {
        period: period.label(),
        total_expenses: round2(total),
        total_budget: round2(total_budget),
        budget_usage: round1(percent(total, total_budget)),
        categories: spends,
        uncategorised,
    }
}
