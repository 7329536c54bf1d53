//! Fund distributor: splits a completed amount across configured buckets.
//!
//! Ratios are exact rationals, so `1/3` means one third and not 0.33. Each
//! bucket gets `floor(amount × ratio)` in minor units and whatever is left
//! over goes to the remainder bucket, which keeps the shares summing to the
//! original amount to the cent.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::Money;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitConfigError {
    #[error("split plan has no buckets")]
    Empty,

    #[error("malformed split entry '{0}', expected bucket=ratio")]
    MalformedEntry(String),

    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),

    #[error("bucket '{0}' appears more than once")]
    DuplicateBucket(String),

    #[error("invalid ratio '{value}' for bucket '{bucket}'")]
    InvalidRatio { bucket: String, value: String },

    #[error("ratio for bucket '{0}' must be greater than zero")]
    NonPositiveRatio(String),

    #[error("ratios must sum to exactly 1, got {0}")]
    RatioSum(String),

    #[error("remainder bucket '{0}' is not part of the split")]
    UnknownRemainderBucket(String),
}

/// A non-negative rational kept in lowest terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    numerator: u64,
    denominator: u64,
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Ratio {
    pub fn new(numerator: u64, denominator: u64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let g = gcd(numerator as u128, denominator as u128).max(1) as u64;
        Some(Self {
            numerator: numerator / g,
            denominator: denominator / g,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for Ratio {
    type Err = ();

    /// Accepts `0.60`, `.5`, `1` or `1/3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((num, den)) = s.split_once('/') {
            let num = num.trim().parse::<u64>().map_err(|_| ())?;
            let den = den.trim().parse::<u64>().map_err(|_| ())?;
            return Ratio::new(num, den).ok_or(());
        }

        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
            || frac.len() > 18
        {
            return Err(());
        }

        let denominator = 10u64.pow(frac.len() as u32);
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| ())?
        };
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| ())?
        };
        let numerator = whole
            .checked_mul(denominator)
            .and_then(|n| n.checked_add(frac))
            .ok_or(())?;
        Ratio::new(numerator, denominator).ok_or(())
    }
}

fn valid_bucket_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validated split configuration. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    ratios: BTreeMap<String, Ratio>,
    remainder_bucket: String,
}

impl SplitPlan {
    pub fn new<I>(ratios: I, remainder_bucket: &str) -> Result<Self, SplitConfigError>
    where
        I: IntoIterator<Item = (String, Ratio)>,
    {
        let mut map = BTreeMap::new();
        for (bucket, ratio) in ratios {
            if !valid_bucket_name(&bucket) {
                return Err(SplitConfigError::InvalidBucket(bucket));
            }
            if ratio.is_zero() {
                return Err(SplitConfigError::NonPositiveRatio(bucket));
            }
            if map.contains_key(&bucket) {
                return Err(SplitConfigError::DuplicateBucket(bucket));
            }
            map.insert(bucket, ratio);
        }

        if map.is_empty() {
            return Err(SplitConfigError::Empty);
        }

        // Sum as a fraction over u128 to stay exact.
        let (mut num, mut den) = (0u128, 1u128);
        for ratio in map.values() {
            let (n, d) = (ratio.numerator as u128, ratio.denominator as u128);
            num = num * d + n * den;
            den *= d;
            let g = gcd(num, den).max(1);
            num /= g;
            den /= g;
        }
        if num != den {
            return Err(SplitConfigError::RatioSum(format!("{}/{}", num, den)));
        }

        if !map.contains_key(remainder_bucket) {
            return Err(SplitConfigError::UnknownRemainderBucket(
                remainder_bucket.to_string(),
            ));
        }

        Ok(Self {
            ratios: map,
            remainder_bucket: remainder_bucket.to_string(),
        })
    }

    /// Parses `owner=0.60,ai_operations=0.20,reserve=0.20`.
    pub fn parse(input: &str, remainder_bucket: &str) -> Result<Self, SplitConfigError> {
        let mut entries = Vec::new();
        for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (bucket, value) = entry
                .split_once('=')
                .ok_or_else(|| SplitConfigError::MalformedEntry(entry.to_string()))?;
            let bucket = bucket.trim().to_string();
            let ratio = value
                .parse::<Ratio>()
                .map_err(|_| SplitConfigError::InvalidRatio {
                    bucket: bucket.clone(),
                    value: value.trim().to_string(),
                })?;
            entries.push((bucket, ratio));
        }
        Self::new(entries, remainder_bucket.trim())
    }

    pub fn buckets(&self) -> impl Iterator<Item = &str> {
        self.ratios.keys().map(String::as_str)
    }

    pub fn ratio(&self, bucket: &str) -> Option<Ratio> {
        self.ratios.get(bucket).copied()
    }

    pub fn remainder_bucket(&self) -> &str {
        &self.remainder_bucket
    }
}

/// Splits `amount` according to `plan`. The shares always sum to `amount`.
pub fn split(amount: &Money, plan: &SplitPlan) -> BTreeMap<String, Money> {
    let minor = amount.minor() as i128;
    let currency = amount.currency();

    let mut shares = BTreeMap::new();
    let mut allocated: i128 = 0;
    for (bucket, ratio) in &plan.ratios {
        let share = (minor * ratio.numerator as i128).div_euclid(ratio.denominator as i128);
        allocated += share;
        shares.insert(bucket.clone(), share);
    }

    if let Some(share) = shares.get_mut(&plan.remainder_bucket) {
        *share += minor - allocated;
    }

    shares
        .into_iter()
        .map(|(bucket, share)| (bucket, Money::from_minor(share as i64, currency.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    fn zar(minor: i64) -> Money {
        Money::from_minor(minor, Currency::zar())
    }

    fn default_plan() -> SplitPlan {
        SplitPlan::parse("owner=0.60,ai_operations=0.20,reserve=0.20", "owner").unwrap()
    }

    fn sum(shares: &BTreeMap<String, Money>) -> i64 {
        shares.values().map(Money::minor).sum()
    }

    #[test]
    fn test_ratio_parsing() {
        assert_eq!("0.60".parse::<Ratio>(), Ok(Ratio::new(3, 5).unwrap()));
        assert_eq!("1/3".parse::<Ratio>(), Ok(Ratio::new(1, 3).unwrap()));
        assert_eq!(".5".parse::<Ratio>(), Ok(Ratio::new(1, 2).unwrap()));
        assert_eq!("1".parse::<Ratio>(), Ok(Ratio::new(1, 1).unwrap()));
        assert!("abc".parse::<Ratio>().is_err());
        assert!("1/0".parse::<Ratio>().is_err());
        assert!("-0.5".parse::<Ratio>().is_err());
        assert!(".".parse::<Ratio>().is_err());
    }

    #[test]
    fn test_default_split_of_2497() {
        let shares = split(&zar(249_700), &default_plan());
        assert_eq!(shares["owner"], zar(149_820));
        assert_eq!(shares["ai_operations"], zar(49_940));
        assert_eq!(shares["reserve"], zar(49_940));
    }

    #[test]
    fn test_thirds_put_remainder_in_configured_bucket() {
        let plan = SplitPlan::parse("a=1/3,b=1/3,c=1/3", "b").unwrap();
        let shares = split(&zar(10_000), &plan);
        assert_eq!(shares["a"], zar(3_333));
        assert_eq!(shares["b"], zar(3_334));
        assert_eq!(shares["c"], zar(3_333));
    }

    #[test]
    fn test_shares_always_sum_to_amount() {
        let plans = [
            default_plan(),
            SplitPlan::parse("a=1/3,b=1/3,c=1/3", "a").unwrap(),
            SplitPlan::parse("x=0.333,y=0.667", "y").unwrap(),
            SplitPlan::parse("solo=1", "solo").unwrap(),
            SplitPlan::parse("p=1/7,q=2/7,r=4/7", "r").unwrap(),
        ];
        for plan in &plans {
            for minor in (1..5_000).chain([99_999_999, 123_456_789_012]) {
                let shares = split(&zar(minor), plan);
                assert_eq!(sum(&shares), minor, "plan {:?} amount {}", plan, minor);
                assert!(shares.values().all(|s| s.minor() >= 0));
            }
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let plan = SplitPlan::parse("a=1/3,b=1/3,c=1/3", "c").unwrap();
        let first = split(&zar(1), &plan);
        for _ in 0..10 {
            assert_eq!(split(&zar(1), &plan), first);
        }
        assert_eq!(first["c"], zar(1));
        assert!(first["a"].is_zero());
    }

    #[test]
    fn test_plan_validation() {
        assert_eq!(SplitPlan::parse("", "owner"), Err(SplitConfigError::Empty));
        assert!(matches!(
            SplitPlan::parse("a=0.5,b=0.4", "a"),
            Err(SplitConfigError::RatioSum(_))
        ));
        assert!(matches!(
            SplitPlan::parse("a=0.5,b=0.5,c=0", "a"),
            Err(SplitConfigError::NonPositiveRatio(_))
        ));
        assert!(matches!(
            SplitPlan::parse("a=0.5,a=0.5", "a"),
            Err(SplitConfigError::DuplicateBucket(_))
        ));
        assert!(matches!(
            SplitPlan::parse("a=0.5,b=0.5", "c"),
            Err(SplitConfigError::UnknownRemainderBucket(_))
        ));
        assert!(matches!(
            SplitPlan::parse("a0.5", "a"),
            Err(SplitConfigError::MalformedEntry(_))
        ));
        assert!(matches!(
            SplitPlan::parse("a=half,b=0.5", "a"),
            Err(SplitConfigError::InvalidRatio { .. })
        ));
    }
}
