//! Queue compilation and request pacing.
//!
//! The queue is TLD-major: every word is paired with the first TLD before any
//! word is paired with the second. Pacing values are drawn per task, either
//! fixed or uniformly from an inclusive range.

use crate::config::LookupSettings;
use crate::types::LookupTask;
use rand::Rng;
use tracing::{debug, warn};

/// Pacing values for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPlan {
    pub time_between_ms: u64,
    pub follow: u32,
    pub timeout_ms: u64,
}

/// Expand `domains × tlds` into fully qualified names, TLD-major.
///
/// # Examples
///
/// ```
/// use domain_digger_lib::compile_queue;
///
/// let words = vec!["a".to_string(), "b".to_string()];
/// let tlds = vec!["com".to_string(), "net".to_string()];
/// assert_eq!(
///     compile_queue(&words, &tlds, "."),
///     vec!["a.com", "b.com", "a.net", "b.net"]
/// );
/// ```
pub fn compile_queue(domains: &[String], tlds: &[String], separator: &str) -> Vec<String> {
    let mut queue = Vec::with_capacity(domains.len() * tlds.len());
    for tld in tlds {
        queue.extend(domains.iter().map(|d| format!("{}{}{}", d, separator, tld)));
    }
    debug!(
        domains = domains.len(),
        tlds = tlds.len(),
        total = queue.len(),
        "compiled queue"
    );
    queue
}

/// Apply the configured character conversion to a name or label.
///
/// - `ascii` drops non-ASCII characters
/// - `punycode` encodes each non-ASCII label as `xn--…` without normalizing
/// - `uts46` is IDNA processing with nontransitional mapping
/// - `uts46-transitional` maps the deviation characters first (ß to ss,
///   final sigma to sigma, joiners removed)
///
/// Anything else, or a name IDNA rejects, is returned unchanged.
pub fn convert_domain(domain: &str, conversion: Option<&str>) -> String {
    let converted = match conversion {
        Some("ascii") => Some(domain.chars().filter(char::is_ascii).collect()),
        Some("punycode") => punycode_labels(domain),
        Some("uts46") => idna::domain_to_ascii(domain).ok(),
        Some("uts46-transitional") => idna::domain_to_ascii(&map_deviations(domain)).ok(),
        _ => return domain.to_string(),
    };

    converted.unwrap_or_else(|| {
        warn!(domain, ?conversion, "domain conversion failed, using name as given");
        domain.to_string()
    })
}

fn punycode_labels(domain: &str) -> Option<String> {
    let labels = domain
        .split('.')
        .map(|label| {
            if label.is_ascii() {
                Some(label.to_string())
            } else {
                idna::punycode::encode_str(label).map(|encoded| format!("xn--{}", encoded))
            }
        })
        .collect::<Option<Vec<_>>>()?;
    Some(labels.join("."))
}

fn map_deviations(domain: &str) -> String {
    let mut mapped = String::with_capacity(domain.len());
    for c in domain.chars() {
        match c {
            'ß' => mapped.push_str("ss"),
            'ς' => mapped.push('σ'),
            '\u{200C}' | '\u{200D}' => {}
            other => mapped.push(other),
        }
    }
    mapped
}

/// The registrable part of `domain` under the public suffix list, e.g.
/// `shop.co.uk` for `www.shop.co.uk`. Names without one are returned as is.
pub fn registrable_domain(domain: &str) -> &str {
    psl::domain_str(domain).unwrap_or(domain)
}

/// Uniform integer in `[min, max]`, swapping reversed bounds.
pub fn random_between<R: Rng>(rng: &mut R, min: u64, max: u64) -> u64 {
    let (low, high) = if min > max { (max, min) } else { (min, max) };
    rng.random_range(low..=high)
}

/// Draw pacing for one task using the thread-local generator.
pub fn plan_pacing(settings: &LookupSettings) -> PacingPlan {
    plan_pacing_with(&mut rand::rng(), settings)
}

/// Draw pacing for one task from `rng`.
pub fn plan_pacing_with<R: Rng>(rng: &mut R, settings: &LookupSettings) -> PacingPlan {
    let general = &settings.general;

    let time_between_ms = if settings.dns_override_active() {
        general.dns_time_between_ms
    } else if settings.randomize_time_between.randomize {
        random_between(
            rng,
            settings.randomize_time_between.minimum_ms,
            settings.randomize_time_between.maximum_ms,
        )
    } else {
        general.time_between_ms
    };

    let follow = if settings.randomize_follow.randomize {
        random_between(
            rng,
            u64::from(settings.randomize_follow.minimum_depth),
            u64::from(settings.randomize_follow.maximum_depth),
        ) as u32
    } else {
        general.follow
    };

    let timeout_ms = if settings.randomize_timeout.randomize {
        random_between(
            rng,
            settings.randomize_timeout.minimum_ms,
            settings.randomize_timeout.maximum_ms,
        )
    } else {
        general.timeout_ms
    };

    PacingPlan {
        time_between_ms,
        follow,
        timeout_ms,
    }
}

/// Build tasks for `queue[start..]` with cumulative dispatch offsets.
///
/// Each task's offset is the sum of its own `time_between` and those of every
/// earlier task in this schedule, so the first task waits one interval.
pub fn build_schedule<R: Rng>(
    rng: &mut R,
    queue: &[String],
    start: usize,
    settings: &LookupSettings,
) -> Vec<LookupTask> {
    schedule_indices(rng, queue, start..queue.len(), settings)
}

/// Like [`build_schedule`], for an arbitrary ascending set of queue indices.
///
/// Indices past the end of `queue` are skipped.
pub fn schedule_indices<R, I>(
    rng: &mut R,
    queue: &[String],
    indices: I,
    settings: &LookupSettings,
) -> Vec<LookupTask>
where
    R: Rng,
    I: IntoIterator<Item = usize>,
{
    let mut offset = 0u64;
    indices
        .into_iter()
        .filter_map(|index| queue.get(index).map(|domain| (index, domain)))
        .map(|(index, domain)| {
            let plan = plan_pacing_with(rng, settings);
            offset = offset.saturating_add(plan.time_between_ms);
            LookupTask {
                domain: domain.clone(),
                index,
                dispatch_offset_ms: offset,
                follow_depth: plan.follow,
                timeout_ms: plan.timeout_ms,
            }
        })
        .collect()
}

/// Upper-bound estimate of the time a run of `total` tasks needs.
pub fn estimate_remaining_ms(total: usize, settings: &LookupSettings) -> u64 {
    let per_task = if settings.dns_override_active() {
        settings.general.dns_time_between_ms
    } else if settings.randomize_time_between.randomize {
        settings
            .randomize_time_between
            .maximum_ms
            .max(settings.randomize_time_between.minimum_ms)
    } else {
        settings.general.time_between_ms
    };

    let timeout = if settings.randomize_timeout.randomize {
        settings
            .randomize_timeout
            .maximum_ms
            .max(settings.randomize_timeout.minimum_ms)
    } else {
        settings.general.timeout_ms
    };

    (total as u64).saturating_mul(per_task).saturating_add(timeout)
}
