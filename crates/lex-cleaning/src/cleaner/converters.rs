//! Type conversion functions for type coercion.
//!
//! All conversions are lenient: a value that cannot be converted becomes
//! null instead of failing the column.

use crate::config::CastType;
use crate::utils::{DtypeCategory, get_dtype_category, parse_boolean_string, parse_numeric_string};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Date layouts tried, in order, for string-to-date casts.
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

/// Datetime layouts whose date part is kept.
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Whether a column of `dtype` can be cast to `to`.
pub(crate) fn is_supported(dtype: &DataType, to: CastType) -> bool {
    let category = get_dtype_category(dtype);
    match to {
        CastType::String => true,
        CastType::Double | CastType::Integer => matches!(
            category,
            DtypeCategory::Numeric | DtypeCategory::String | DtypeCategory::Boolean
        ),
        CastType::Boolean => matches!(
            category,
            DtypeCategory::Numeric | DtypeCategory::String | DtypeCategory::Boolean
        ),
        CastType::Date => {
            matches!(category, DtypeCategory::String)
                || matches!(dtype, DataType::Date | DataType::Datetime(_, _))
        }
    }
}

/// Cast `series` to `to`. Unsupported inputs should be rejected with
/// [`is_supported`] first.
pub(crate) fn cast_series(series: &Series, to: CastType) -> PolarsResult<Series> {
    let is_string = matches!(get_dtype_category(series.dtype()), DtypeCategory::String);
    match to {
        CastType::Double if is_string => string_to_numeric(series, &DataType::Float64),
        CastType::Double => series.cast(&DataType::Float64),
        CastType::Integer if is_string => string_to_numeric(series, &DataType::Int64),
        CastType::Integer => series.cast(&DataType::Int64),
        CastType::Boolean if is_string => string_to_boolean(series),
        CastType::Boolean => series.cast(&DataType::Boolean),
        CastType::String => series.cast(&DataType::String),
        CastType::Date if is_string => string_to_date(series),
        CastType::Date => series.cast(&DataType::Date),
    }
}

/// Convert a string series to Float64 or Int64 (fractions truncated).
pub(crate) fn string_to_numeric(series: &Series, target_dtype: &DataType) -> PolarsResult<Series> {
    let str_series = series.cast(&DataType::String)?;
    let parsed = str_series
        .str()?
        .into_iter()
        .map(|opt_val| opt_val.and_then(parse_numeric_string));

    match target_dtype {
        DataType::Int64 => {
            let values: Vec<Option<i64>> = parsed
                .map(|v| v.filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .collect();
            Ok(Series::new(series.name().clone(), values))
        }
        _ => {
            let values: Vec<Option<f64>> = parsed.collect();
            Ok(Series::new(series.name().clone(), values))
        }
    }
}

/// Convert a string series to Boolean using common spellings.
pub(crate) fn string_to_boolean(series: &Series) -> PolarsResult<Series> {
    let str_series = series.cast(&DataType::String)?;
    let values: Vec<Option<bool>> = str_series
        .str()?
        .into_iter()
        .map(|opt_val| opt_val.and_then(parse_boolean_string))
        .collect();
    Ok(Series::new(series.name().clone(), values))
}

/// Convert a string series to Date.
pub(crate) fn string_to_date(series: &Series) -> PolarsResult<Series> {
    let str_series = series.cast(&DataType::String)?;
    let days: Vec<Option<i32>> = str_series
        .str()?
        .into_iter()
        .map(|opt_val| opt_val.and_then(parse_date))
        .map(|date| date.map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
        .collect();
    Series::new(series.name().clone(), days).cast(&DataType::Date)
}

/// Parse a date from the supported layouts, or from a datetime/RFC 3339 value.
pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
}
