pub mod debug {
	pub mod error;
}

pub mod lang {
	pub mod natural;
}

pub mod mem {
	pub mod bitset;
	pub mod free_list;
	pub mod hash;
	pub mod intern;
}
