//! Compound metric computation.
//!
//! Compound metrics are derived from the raw source outputs of one run. A
//! compound metric is `None` whenever one of its inputs is `None`, a ratio's
//! denominator is zero, or the arithmetic would not produce a finite number.
//!
//! Evaluation happens in two phases: the base metrics are computed once into
//! [`BaseMetrics`], then the dependent metrics read from that struct.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::retriever::{OutputsBag, SpreadsheetOutput};

// ============================================
// Spreadsheet metric names used as inputs
// ============================================

pub const PROJECTS_GAVE_UPDATE_COUNT: &str = "projects_gave_update_count";
pub const PROJECTS_COUNT: &str = "projects_count";
pub const VOTER_POWER_CONCENTRATION_INDEX: &str = "voter_power_concentration_index";

/// Name of a compound metric as persisted in the compound collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundMetricName {
    TreasuryValue,
    ProtocolRevenue,
    VoterParticipationRatio,
    SelfReportingPercentage,
    AnnualizedYield,
    CoverageRatio,
    GovernanceAssetValue,
}

impl CompoundMetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompoundMetricName::TreasuryValue => "treasury_value",
            CompoundMetricName::ProtocolRevenue => "protocol_revenue",
            CompoundMetricName::VoterParticipationRatio => "voter_participation_ratio",
            CompoundMetricName::SelfReportingPercentage => "self_reporting_percentage",
            CompoundMetricName::AnnualizedYield => "annualized_yield",
            CompoundMetricName::CoverageRatio => "coverage_ratio",
            CompoundMetricName::GovernanceAssetValue => "governance_asset_value",
        }
    }
}

impl fmt::Display for CompoundMetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Formulas
// ============================================

#[inline]
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// `numerator / denominator`, absent on a zero denominator.
#[inline]
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (numerator, denominator) = (numerator?, denominator?);
    if denominator == 0.0 {
        return None;
    }
    finite(numerator / denominator)
}

#[inline]
pub fn treasury_value(total_balance: Option<f64>, price: Option<f64>) -> Option<f64> {
    finite(total_balance? * price?)
}

#[inline]
pub fn protocol_revenue(token_burn: Option<f64>, price: Option<f64>) -> Option<f64> {
    finite(token_burn? * price?)
}

#[inline]
pub fn annualized_yield(
    protocol_revenue: Option<f64>,
    circulating_supply: Option<f64>,
    annualization_factor: f64,
) -> Option<f64> {
    finite(ratio(protocol_revenue, circulating_supply)? * annualization_factor)
}

#[inline]
pub fn coverage_ratio(protocol_revenue: Option<f64>, token_issuance: Option<f64>) -> Option<f64> {
    ratio(protocol_revenue, token_issuance)
}

#[inline]
pub fn voter_participation_ratio(
    votes_count: Option<f64>,
    voters_count: Option<f64>,
) -> Option<f64> {
    ratio(votes_count, voters_count)
}

#[inline]
pub fn governance_asset_value(
    voter_participation_ratio: Option<f64>,
    treasury_value: Option<f64>,
    power_concentration_index: Option<f64>,
) -> Option<f64> {
    finite(treasury_value? * voter_participation_ratio? * (1.0 - power_concentration_index?))
}

/// Share of projects that reported on `date`. Both series must hold a value
/// for that same calendar day.
pub fn self_reporting_percentage(date: NaiveDate, spreadsheet: &SpreadsheetOutput) -> Option<f64> {
    ratio(
        spreadsheet.value_on(PROJECTS_GAVE_UPDATE_COUNT, date),
        spreadsheet.value_on(PROJECTS_COUNT, date),
    )
}

// ============================================
// Aggregation
// ============================================

/// Metrics that only depend on raw source outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BaseMetrics {
    pub treasury_value: Option<f64>,
    pub protocol_revenue: Option<f64>,
    pub voter_participation_ratio: Option<f64>,
    pub self_reporting_percentage: Option<f64>,
}

/// All compound metrics of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompoundMetrics {
    pub treasury_value: Option<f64>,
    pub protocol_revenue: Option<f64>,
    pub voter_participation_ratio: Option<f64>,
    pub self_reporting_percentage: Option<f64>,
    pub annualized_yield: Option<f64>,
    pub coverage_ratio: Option<f64>,
    pub governance_asset_value: Option<f64>,
}

impl CompoundMetrics {
    /// Every metric in evaluation order, base metrics first.
    pub fn iter(&self) -> impl Iterator<Item = (CompoundMetricName, Option<f64>)> {
        [
            (CompoundMetricName::TreasuryValue, self.treasury_value),
            (CompoundMetricName::ProtocolRevenue, self.protocol_revenue),
            (
                CompoundMetricName::VoterParticipationRatio,
                self.voter_participation_ratio,
            ),
            (
                CompoundMetricName::SelfReportingPercentage,
                self.self_reporting_percentage,
            ),
            (CompoundMetricName::AnnualizedYield, self.annualized_yield),
            (CompoundMetricName::CoverageRatio, self.coverage_ratio),
            (
                CompoundMetricName::GovernanceAssetValue,
                self.governance_asset_value,
            ),
        ]
        .into_iter()
    }

    pub fn defined_count(&self) -> usize {
        self.iter().filter(|(_, value)| value.is_some()).count()
    }
}

/// Computes compound metrics from a run's outputs.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    annualization_factor: f64,
}

impl Aggregator {
    pub fn new(annualization_factor: f64) -> Self {
        Self {
            annualization_factor,
        }
    }

    pub fn base(&self, date: NaiveDate, bag: &OutputsBag) -> BaseMetrics {
        let price = bag.price().and_then(|p| p.price);
        let chain = bag.chain_analytics();
        let governance = bag.governance();

        BaseMetrics {
            treasury_value: treasury_value(chain.and_then(|c| c.total_balance), price),
            protocol_revenue: protocol_revenue(chain.and_then(|c| c.token_burn), price),
            voter_participation_ratio: voter_participation_ratio(
                governance.map(|g| g.votes_count as f64),
                governance.map(|g| g.voters_count as f64),
            ),
            self_reporting_percentage: bag
                .spreadsheet()
                .and_then(|sheet| self_reporting_percentage(date, sheet)),
        }
    }

    pub fn compute(&self, date: NaiveDate, bag: &OutputsBag) -> CompoundMetrics {
        let base = self.base(date, bag);
        let chain = bag.chain_analytics();
        let concentration = bag
            .spreadsheet()
            .and_then(|sheet| sheet.latest_on_or_before(VOTER_POWER_CONCENTRATION_INDEX, date));

        CompoundMetrics {
            treasury_value: base.treasury_value,
            protocol_revenue: base.protocol_revenue,
            voter_participation_ratio: base.voter_participation_ratio,
            self_reporting_percentage: base.self_reporting_percentage,
            annualized_yield: annualized_yield(
                base.protocol_revenue,
                chain.and_then(|c| c.circulating_supply),
                self.annualization_factor,
            ),
            coverage_ratio: coverage_ratio(
                base.protocol_revenue,
                chain.and_then(|c| c.token_issuance),
            ),
            governance_asset_value: governance_asset_value(
                base.voter_participation_ratio,
                base.treasury_value,
                concentration,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::{
        CellValue, ChainAnalyticsOutput, GovernanceOutput, PriceOutput, SheetRow, SourceId,
        SourceOutput,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn approx(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("metric should be defined");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn sheet(rows: &[(&str, NaiveDate, f64)]) -> SpreadsheetOutput {
        let mut output = SpreadsheetOutput::default();
        for (name, row_date, value) in rows {
            let series = output.metrics.entry(name.to_string()).or_default();
            series.push(SheetRow {
                date: *row_date,
                value: CellValue::Number(*value),
            });
        }
        output
    }

    fn full_bag(day: NaiveDate) -> OutputsBag {
        let mut bag = OutputsBag::new();
        bag.insert(
            SourceId::Price,
            Some(SourceOutput::Price(PriceOutput { price: Some(0.05) })),
        );
        bag.insert(
            SourceId::ChainAnalytics,
            Some(SourceOutput::ChainAnalytics(ChainAnalyticsOutput {
                total_balance: Some(10000.0),
                token_burn: Some(100.0),
                token_issuance: Some(50.0),
                circulating_supply: Some(1000.0),
                ..Default::default()
            })),
        );
        bag.insert(
            SourceId::Governance,
            Some(SourceOutput::Governance(GovernanceOutput {
                votes_count: 30,
                voters_count: 50,
                ..Default::default()
            })),
        );
        bag.insert(
            SourceId::Spreadsheet,
            Some(SourceOutput::Spreadsheet(sheet(&[
                (VOTER_POWER_CONCENTRATION_INDEX, day, 0.2),
                (PROJECTS_GAVE_UPDATE_COUNT, day, 3.0),
                (PROJECTS_COUNT, day, 4.0),
            ]))),
        );
        bag
    }

    #[test]
    fn test_end_to_end_scenario() {
        let day = date(2024, 1, 1);
        let metrics = Aggregator::new(365.0).compute(day, &full_bag(day));

        approx(metrics.protocol_revenue, 5.0);
        approx(metrics.treasury_value, 500.0);
        approx(metrics.coverage_ratio, 0.1);
        approx(metrics.voter_participation_ratio, 0.6);
        approx(metrics.governance_asset_value, 240.0);
        approx(metrics.annualized_yield, 5.0 / 1000.0 * 365.0);
        approx(metrics.self_reporting_percentage, 0.75);
        assert_eq!(metrics.defined_count(), 7);
    }

    #[test]
    fn test_annualization_factor_is_applied() {
        let day = date(2024, 1, 1);
        let metrics = Aggregator::new(1.0).compute(day, &full_bag(day));
        approx(metrics.annualized_yield, 0.005);
    }

    #[test]
    fn test_undefined_inputs_propagate() {
        assert_eq!(treasury_value(None, Some(1.0)), None);
        assert_eq!(treasury_value(Some(1.0), None), None);
        assert_eq!(protocol_revenue(None, Some(1.0)), None);
        assert_eq!(annualized_yield(None, Some(1.0), 365.0), None);
        assert_eq!(annualized_yield(Some(1.0), None, 365.0), None);
        assert_eq!(coverage_ratio(Some(1.0), None), None);
        assert_eq!(voter_participation_ratio(None, Some(2.0)), None);
        assert_eq!(governance_asset_value(Some(0.5), Some(10.0), None), None);
        assert_eq!(governance_asset_value(None, Some(10.0), Some(0.1)), None);
        assert_eq!(governance_asset_value(Some(0.5), None, Some(0.1)), None);
    }

    #[test]
    fn test_zero_denominator_is_undefined() {
        assert_eq!(annualized_yield(Some(5.0), Some(0.0), 365.0), None);
        assert_eq!(coverage_ratio(Some(5.0), Some(0.0)), None);
        assert_eq!(voter_participation_ratio(Some(3.0), Some(0.0)), None);
        assert_eq!(ratio(Some(0.0), Some(0.0)), None);
    }

    #[test]
    fn test_zero_numerator_is_a_value() {
        assert_eq!(protocol_revenue(Some(0.0), Some(0.05)), Some(0.0));
        assert_eq!(coverage_ratio(Some(0.0), Some(50.0)), Some(0.0));
        assert_eq!(
            governance_asset_value(Some(0.5), Some(10.0), Some(1.0)),
            Some(0.0)
        );
    }

    #[test]
    fn test_non_finite_results_are_undefined() {
        assert_eq!(treasury_value(Some(f64::MAX), Some(10.0)), None);
        assert_eq!(ratio(Some(f64::NAN), Some(1.0)), None);
    }

    #[test]
    fn test_self_reporting_requires_same_day() {
        let day = date(2024, 1, 1);

        let matching = sheet(&[
            (PROJECTS_GAVE_UPDATE_COUNT, day, 3.0),
            (PROJECTS_COUNT, day, 6.0),
        ]);
        approx(self_reporting_percentage(day, &matching), 0.5);

        let mismatched = sheet(&[
            (PROJECTS_GAVE_UPDATE_COUNT, day, 3.0),
            (PROJECTS_COUNT, date(2023, 12, 31), 6.0),
        ]);
        assert_eq!(self_reporting_percentage(day, &mismatched), None);

        let zero_total = sheet(&[
            (PROJECTS_GAVE_UPDATE_COUNT, day, 3.0),
            (PROJECTS_COUNT, day, 0.0),
        ]);
        assert_eq!(self_reporting_percentage(day, &zero_total), None);

        assert_eq!(
            self_reporting_percentage(day, &SpreadsheetOutput::default()),
            None
        );
    }

    #[test]
    fn test_failed_source_only_affects_dependents() {
        let day = date(2024, 1, 1);
        let mut bag = full_bag(day);
        bag.insert(SourceId::Governance, None);

        let metrics = Aggregator::new(365.0).compute(day, &bag);

        assert_eq!(metrics.voter_participation_ratio, None);
        assert_eq!(metrics.governance_asset_value, None);
        approx(metrics.treasury_value, 500.0);
        approx(metrics.protocol_revenue, 5.0);
        approx(metrics.coverage_ratio, 0.1);
    }

    #[test]
    fn test_failed_price_undefines_value_metrics() {
        let day = date(2024, 1, 1);
        let mut bag = full_bag(day);
        bag.insert(SourceId::Price, None);

        let metrics = Aggregator::new(365.0).compute(day, &bag);

        assert_eq!(metrics.treasury_value, None);
        assert_eq!(metrics.protocol_revenue, None);
        assert_eq!(metrics.annualized_yield, None);
        assert_eq!(metrics.coverage_ratio, None);
        assert_eq!(metrics.governance_asset_value, None);
        approx(metrics.voter_participation_ratio, 0.6);
        approx(metrics.self_reporting_percentage, 0.75);
    }

    #[test]
    fn test_iter_order_puts_base_metrics_first() {
        let names: Vec<&str> = CompoundMetrics::default()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "treasury_value",
                "protocol_revenue",
                "voter_participation_ratio",
                "self_reporting_percentage",
                "annualized_yield",
                "coverage_ratio",
                "governance_asset_value",
            ]
        );
    }
}
