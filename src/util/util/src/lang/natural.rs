use std::{cmp::Ordering, iter::Peekable, str::Chars};

/// Compares two strings ignoring ASCII case, treating every run of decimal digits as one number.
/// `"Item2"` sorts before `"item10"`. Ties between numerically equal runs with different widths
/// (`"a01"` vs `"a1"`) are broken by the shorter run first so the order stays total.
pub fn natural_cmp_ignore_case(a: &str, b: &str) -> Ordering {
	let mut a = a.chars().peekable();
	let mut b = b.chars().peekable();

	loop {
		match (a.peek().copied(), b.peek().copied()) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
				let run_a = take_digits(&mut a);
				let run_b = take_digits(&mut b);

				let ord = cmp_digit_runs(&run_a, &run_b);
				if ord != Ordering::Equal {
					return ord;
				}
			}
			(Some(ca), Some(cb)) => {
				let ord = ca.to_ascii_lowercase().cmp(&cb.to_ascii_lowercase());
				if ord != Ordering::Equal {
					return ord;
				}
				a.next();
				b.next();
			}
		}
	}
}

fn take_digits(iter: &mut Peekable<Chars<'_>>) -> String {
	let mut run = String::new();
	while let Some(c) = iter.next_if(|c| c.is_ascii_digit()) {
		run.push(c);
	}
	run
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
	let trimmed_a = a.trim_start_matches('0');
	let trimmed_b = b.trim_start_matches('0');

	trimmed_a
		.len()
		.cmp(&trimmed_b.len())
		.then_with(|| trimmed_a.cmp(trimmed_b))
		.then_with(|| a.len().cmp(&b.len()))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn digits_compare_numerically() {
		assert_eq!(natural_cmp_ignore_case("Item2", "item10"), Ordering::Less);
		assert_eq!(natural_cmp_ignore_case("item10", "Item2"), Ordering::Greater);
		assert_eq!(natural_cmp_ignore_case("ABC", "abc"), Ordering::Equal);
		assert_eq!(natural_cmp_ignore_case("abc", "abcd"), Ordering::Less);
		assert_eq!(natural_cmp_ignore_case("a1", "a01"), Ordering::Less);
	}

	#[test]
	fn sorts_class_names() {
		let mut names = vec!["Player", "GameBase", "item12", "Item3", "gameBase2"];
		names.sort_by(|a, b| natural_cmp_ignore_case(a, b));
		assert_eq!(names, vec!["GameBase", "gameBase2", "Item3", "item12", "Player"]);
	}
}
