pub mod crawler;
pub mod harvester;
pub mod providers;
pub mod ranker;
pub mod recommendations;
pub mod retry;
pub mod similarity;
