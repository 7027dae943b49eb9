//! Declarative descriptors handed in from the surrounding pipeline:
//! aggregation kinds, data sources, same-unit pairs, the column to be
//! aggregated. `spec.md` §6.

use serde::{Deserialize, Serialize};

/// The aggregation families from `spec.md` §1/§4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationKind {
    Avg,
    Count,
    CountDistinct,
    CountMinusCountDistinct,
    First,
    Last,
    Max,
    Median,
    Min,
    Skewness,
    Stddev,
    Sum,
    Var,
}

impl AggregationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationKind::Avg => "AVG",
            AggregationKind::Count => "COUNT",
            AggregationKind::CountDistinct => "COUNT DISTINCT",
            AggregationKind::CountMinusCountDistinct => "COUNT MINUS COUNT DISTINCT",
            AggregationKind::First => "FIRST",
            AggregationKind::Last => "LAST",
            AggregationKind::Max => "MAX",
            AggregationKind::Median => "MEDIAN",
            AggregationKind::Min => "MIN",
            AggregationKind::Skewness => "SKEWNESS",
            AggregationKind::Stddev => "STDDEV",
            AggregationKind::Sum => "SUM",
            AggregationKind::Var => "VAR",
        }
    }

    pub fn parse(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AVG" => Ok(AggregationKind::Avg),
            "COUNT" => Ok(AggregationKind::Count),
            "COUNT DISTINCT" => Ok(AggregationKind::CountDistinct),
            "COUNT MINUS COUNT DISTINCT" => Ok(AggregationKind::CountMinusCountDistinct),
            "FIRST" => Ok(AggregationKind::First),
            "LAST" => Ok(AggregationKind::Last),
            "MAX" => Ok(AggregationKind::Max),
            "MEDIAN" => Ok(AggregationKind::Median),
            "MIN" => Ok(AggregationKind::Min),
            "SKEWNESS" => Ok(AggregationKind::Skewness),
            "STDDEV" => Ok(AggregationKind::Stddev),
            "SUM" => Ok(AggregationKind::Sum),
            "VAR" => Ok(AggregationKind::Var),
            other => Err(crate::error::CoreError::UnknownAggregationKind(
                other.to_string(),
            )),
        }
    }

    /// Per-kind static traits from `spec.md` §4.4's table — the single
    /// source of truth for which running statistics the aggregator must
    /// maintain.
    pub fn needs(&self) -> AggregationNeeds {
        use AggregationKind::*;
        match self {
            Sum | Count => AggregationNeeds::NONE,
            Avg => AggregationNeeds {
                count: true,
                sum: true,
                ..AggregationNeeds::NONE
            },
            Var | Stddev => AggregationNeeds {
                count: true,
                sum: true,
                sum_sq: true,
                ..AggregationNeeds::NONE
            },
            Skewness => AggregationNeeds {
                count: true,
                sum: true,
                sum_sq: true,
                sum_cubed: true,
                ..AggregationNeeds::NONE
            },
            Min | Max | First | Last => AggregationNeeds {
                count: true,
                sorting: true,
                match_ptr: true,
                altered: true,
                ..AggregationNeeds::NONE
            },
            Median => AggregationNeeds {
                count: true,
                sorting: true,
                match_ptr: true,
                altered: true,
                ..AggregationNeeds::NONE
            },
            CountDistinct | CountMinusCountDistinct => AggregationNeeds {
                sorting: true,
                altered: true,
                ..AggregationNeeds::NONE
            },
        }
    }

    /// Whether matches are sorted by time stamp (FIRST/LAST) rather than by
    /// aggregated value (MIN/MAX/MEDIAN/COUNT DISTINCT/...).
    pub fn sorts_by_time_stamp(&self) -> bool {
        matches!(self, AggregationKind::First | AggregationKind::Last)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationNeeds {
    pub count: bool,
    pub sum: bool,
    pub sum_sq: bool,
    pub sum_cubed: bool,
    pub sorting: bool,
    pub match_ptr: bool,
    pub altered: bool,
}

impl AggregationNeeds {
    pub const NONE: Self = AggregationNeeds {
        count: false,
        sum: false,
        sum_sq: false,
        sum_cubed: false,
        sorting: false,
        match_ptr: false,
        altered: false,
    };
}

/// Which column/table the split enumerator should rewrite a match's scratch
/// value field from (`spec.md` §4.2/§6's `data_used_` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    PeripheralNumerical,
    PeripheralDiscrete,
    PeripheralCategorical,
    PopulationNumerical,
    PopulationDiscrete,
    PopulationCategorical,
    TimeStampsDiff,
    SameUnitNumerical,
    SameUnitDiscrete,
    SameUnitCategorical,
    Subfeature,
}

impl DataSource {
    /// Whether this source produces values eligible for categorical/word
    /// membership splits rather than numeric threshold splits.
    pub fn is_categorical(&self) -> bool {
        matches!(
            self,
            DataSource::PeripheralCategorical
                | DataSource::PopulationCategorical
                | DataSource::SameUnitCategorical
        )
    }
}

/// Declares that two columns (one peripheral, one population-or-peripheral)
/// share a physical unit, enabling difference-based aggregation
/// (`spec.md` §4.2, `SameUnitNumerical`/`SameUnitDiscrete`).
#[derive(Debug, Clone)]
pub struct SameUnitPair {
    pub peripheral_column: String,
    pub other_table: String,
    pub other_column: String,
}

/// The column the aggregation reduces over, plus the table it lives in.
#[derive(Debug, Clone)]
pub struct ColumnToBeAggregated {
    pub table: String,
    pub column: String,
    pub source: DataSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            AggregationKind::parse("avg").unwrap(),
            AggregationKind::Avg
        );
        assert_eq!(
            AggregationKind::parse("Count Distinct").unwrap(),
            AggregationKind::CountDistinct
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(AggregationKind::parse("bogus").is_err());
    }

    #[test]
    fn needs_table_matches_spec() {
        assert!(!AggregationKind::Sum.needs().count);
        assert!(AggregationKind::Avg.needs().sum);
        assert!(AggregationKind::Var.needs().sum_sq);
        assert!(AggregationKind::Skewness.needs().sum_cubed);
        assert!(AggregationKind::Min.needs().match_ptr);
        assert!(AggregationKind::CountDistinct.needs().altered);
        assert!(!AggregationKind::CountDistinct.needs().count);
    }
}
