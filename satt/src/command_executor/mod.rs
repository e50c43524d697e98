pub mod blade;
