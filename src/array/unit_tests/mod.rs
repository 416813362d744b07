#[cfg(test)]
mod vcl_tests;
#[cfg(test)]
mod zarray_tests;
