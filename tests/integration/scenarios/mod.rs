mod construction;
mod contention;
mod hauling;
mod mining;
mod persistence;
